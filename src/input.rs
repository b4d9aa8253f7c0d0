//! Provides a means to read, parse and hold configuration options for scans.
use clap::Parser;
use serde_derive::Deserialize;
use std::fs;
use std::path::PathBuf;

#[derive(Parser, Debug, Clone)]
#[command(
    name = "reconscan",
    version = env!("CARGO_PKG_VERSION"),
    max_term_width = 120,
    help_template = "{bin} {version}\n{about}\n\nUSAGE:\n    {usage}\n\nOPTIONS:\n{options}",
)]
/// Concurrent service reconnaissance driven by Nmap.
/// WARNING Only run this program against infrastructure you are authorized
/// to test; the discovery scripts it requests are intrusive.
pub struct Opts {
    /// A comma-delimited list of CIDRs, IPs, or hosts to be scanned.
    #[arg(short, long, value_delimiter = ',')]
    pub addresses: Vec<String>,

    /// Scan the N most common ports of the catalog. The catalog is ordered
    /// most common first, so this always takes a prefix.
    #[arg(short = 'p', long, default_value = "300")]
    pub top_ports: usize,

    /// Custom path to a JSON port catalog (an array of port numbers,
    /// most common first). Defaults to the embedded top-100 list.
    #[arg(long, value_parser)]
    pub catalog: Option<PathBuf>,

    /// Whether to ignore the configuration file or not.
    #[arg(short, long)]
    pub no_config: bool,

    /// Hide the banner
    #[arg(long)]
    pub no_banner: bool,

    /// Custom path to config file
    #[arg(short, long, value_parser)]
    pub config_path: Option<PathBuf>,

    /// Greppable mode. Only output findings as JSON lines. Useful for grep
    /// or piping to downstream tooling.
    #[arg(short, long)]
    pub greppable: bool,

    /// Accessible mode. Turns off features which negatively affect screen readers.
    #[arg(long)]
    pub accessible: bool,

    /// The deadline in seconds for scanning a single target. The slowest
    /// worker is cut off when the deadline passes.
    #[arg(short, long, default_value = "900")]
    pub deadline: u64,

    /// Write the materialized findings to a JSON report file for
    /// downstream consumers.
    #[arg(short, long, value_parser)]
    pub output: Option<PathBuf>,

    /// Extra arguments appended to every engine invocation.
    /// To pass the argument -Pn, end reconscan's args with '-- -Pn'.
    /// Example: 'reconscan -a 10.0.0.0/24 -- -Pn --max-retries 2'.
    #[arg(last = true)]
    pub command: Vec<String>,
}

#[cfg(not(tarpaulin_include))]
impl Opts {
    /// Reads the command line arguments into an Opts struct.
    pub fn read() -> Self {
        Opts::parse()
    }

    /// Merges the values found within the user configuration file into the
    /// command line arguments.
    pub fn merge(&mut self, config: &Config) {
        if !self.no_config {
            self.merge_required(config);
            self.merge_optional(config);
        }
    }

    fn merge_required(&mut self, config: &Config) {
        macro_rules! merge_required {
            ($($field: ident),+) => {
                $(
                    if let Some(e) = &config.$field {
                        self.$field = e.clone();
                    }
                )+
            }
        }

        merge_required!(addresses, top_ports, greppable, accessible, deadline, command);
    }

    fn merge_optional(&mut self, config: &Config) {
        macro_rules! merge_optional {
            ($($field: ident),+) => {
                $(
                    if config.$field.is_some() {
                        self.$field = config.$field.clone();
                    }
                )+
            }
        }

        merge_optional!(catalog, output);
    }
}

impl Default for Opts {
    fn default() -> Self {
        Self {
            addresses: vec![],
            top_ports: 300,
            catalog: None,
            no_config: true,
            no_banner: false,
            config_path: None,
            greppable: false,
            accessible: false,
            deadline: 900,
            output: None,
            command: vec![],
        }
    }
}

/// Struct used to deserialize the options specified within our config file.
/// These will be further merged with our command line arguments in order to
/// generate the final Opts struct.
#[cfg(not(tarpaulin_include))]
#[derive(Debug, Deserialize)]
pub struct Config {
    addresses: Option<Vec<String>>,
    top_ports: Option<usize>,
    catalog: Option<PathBuf>,
    greppable: Option<bool>,
    accessible: Option<bool>,
    deadline: Option<u64>,
    output: Option<PathBuf>,
    command: Option<Vec<String>>,
}

#[cfg(not(tarpaulin_include))]
impl Config {
    /// Reads the configuration file with TOML format and parses it into a
    /// Config struct.
    ///
    /// # Format
    ///
    /// addresses = ["10.0.0.0/24", "10.0.1.7"]
    /// top_ports = 300
    /// greppable = true
    /// deadline = 600
    /// command = ["-Pn"]
    ///
    pub fn read(custom_config_path: Option<PathBuf>) -> Self {
        let mut content = String::new();
        let config_path = custom_config_path.unwrap_or_else(default_config_path);
        if config_path.exists() {
            content = fs::read_to_string(config_path).unwrap_or_default();
        }

        let config: Config = match toml::from_str(&content) {
            Ok(config) => config,
            Err(e) => {
                println!("Found {e} in configuration file.\nAborting scan.\n");
                std::process::exit(1);
            }
        };

        config
    }
}

/// Constructs default path to config toml
pub fn default_config_path() -> PathBuf {
    let Some(mut config_path) = dirs::home_dir() else {
        panic!("Could not infer config file path.");
    };
    config_path.push(".reconscan.toml");
    config_path
}

#[cfg(test)]
mod tests {
    use clap::{CommandFactory, Parser};
    use parameterized::parameterized;

    use super::{Config, Opts};

    impl Config {
        fn default() -> Self {
            Self {
                addresses: Some(vec!["10.0.0.0/24".to_owned()]),
                top_ports: Some(100),
                catalog: None,
                greppable: Some(true),
                accessible: Some(true),
                deadline: Some(600),
                output: None,
                command: Some(vec!["-Pn".to_owned()]),
            }
        }
    }

    #[test]
    fn verify_cli() {
        Opts::command().debug_assert();
    }

    #[parameterized(input = {
        vec!["reconscan", "--addresses", "10.0.0.1"],
        vec!["reconscan", "--addresses", "10.0.0.1", "--", "-Pn"],
        vec!["reconscan", "-p", "100", "-a", "10.0.0.1", "--", "-Pn", "--max-retries", "2"],
    }, command = {
        vec![],
        vec!["-Pn".to_owned()],
        vec!["-Pn".to_owned(), "--max-retries".to_owned(), "2".to_owned()],
    })]
    fn parse_trailing_command(input: Vec<&str>, command: Vec<String>) {
        let opts = Opts::parse_from(input);

        assert_eq!(vec!["10.0.0.1".to_owned()], opts.addresses);
        assert_eq!(command, opts.command);
    }

    #[test]
    fn parse_comma_delimited_addresses() {
        let opts = Opts::parse_from(["reconscan", "-a", "10.0.0.1,10.0.0.2"]);
        assert_eq!(
            opts.addresses,
            vec!["10.0.0.1".to_owned(), "10.0.0.2".to_owned()]
        );
    }

    #[test]
    fn opts_no_merge_when_config_is_ignored() {
        let mut opts = Opts::default();
        let config = Config::default();

        opts.merge(&config);

        assert_eq!(opts.addresses, vec![] as Vec<String>);
        assert_eq!(opts.top_ports, 300);
        assert!(!opts.greppable);
        assert!(!opts.accessible);
        assert_eq!(opts.deadline, 900);
        assert_eq!(opts.command, vec![] as Vec<String>);
    }

    #[test]
    fn opts_merge_required_arguments() {
        let mut opts = Opts::default();
        let config = Config::default();

        opts.merge_required(&config);

        assert_eq!(opts.addresses, config.addresses.unwrap());
        assert_eq!(opts.top_ports, config.top_ports.unwrap());
        assert_eq!(opts.greppable, config.greppable.unwrap());
        assert_eq!(opts.accessible, config.accessible.unwrap());
        assert_eq!(opts.deadline, config.deadline.unwrap());
        assert_eq!(opts.command, config.command.unwrap());
    }

    #[test]
    fn opts_merge_optional_arguments() {
        let mut opts = Opts::default();
        let mut config = Config::default();
        config.catalog = Some("/srv/recon/ports.json".into());
        config.output = Some("report.json".into());

        opts.merge_optional(&config);

        assert_eq!(opts.catalog, config.catalog);
        assert_eq!(opts.output, config.output);
    }
}
