use clap::Parser;
use clap::Subcommand;
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[clap(version, about = "Runs groups of replicated batch jobs as one unit")]
pub(crate) struct Cli {
    #[clap(subcommand)]
    pub(crate) command: Command,

    #[clap(
        short,
        long,
        default_value = "/etc/jobgroup/config.yaml",
        global = true
    )]
    pub(crate) config: PathBuf,
}

#[derive(Debug, Clone, Subcommand)]
pub(crate) enum Command {
    /// Run the controller and, if enabled, the admission webhook.
    Run {},
    /// Print the JobGroup CustomResourceDefinition as YAML.
    Crd {},
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_run_with_config() {
        let cli = Cli::try_parse_from(["jobgroup-controller", "run", "--config", "/tmp/c.yaml"])
            .unwrap();
        assert!(matches!(cli.command, Command::Run {}));
        assert_eq!(cli.config, PathBuf::from("/tmp/c.yaml"));
    }

    #[test]
    fn test_default_config_path() {
        let cli = Cli::try_parse_from(["jobgroup-controller", "crd"]).unwrap();
        assert!(matches!(cli.command, Command::Crd {}));
        assert_eq!(cli.config, PathBuf::from("/etc/jobgroup/config.yaml"));
    }
}
