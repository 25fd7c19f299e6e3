use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use kura_ca::install::config::{
    ExternalCaType, InstallConfig, RoleRequest, Secret, SerialMode, TokenOptions,
};

#[derive(Parser, Debug)]
#[command(
    name = "kura",
    version,
    about = "Install and renew the certificate authority of an identity domain"
)]
pub struct Cli {
    /// Settings file (default: <data dir>/config.toml)
    #[arg(long, env = "KURA_CONFIG", value_name = "PATH", global = true)]
    pub config: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, env = "KURA_LOG", global = true)]
    pub log_level: Option<String>,

    /// Increase verbosity (-v = debug, -vv = trace)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Write logs to file (in addition to stderr)
    #[arg(long, env = "KURA_LOG_FILE", value_name = "PATH", global = true)]
    pub log_file: Option<PathBuf>,

    /// Output JSON instead of human-readable text
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Install the CA subsystem on this host
    Install(InstallArgs),
    /// Pre-renewal hook: take the renewal lock and stop the subsystem
    RenewPrepare {
        /// Nickname of the certificate about to be renewed
        nickname: String,
    },
    /// Post-renewal hook: propagate a renewed certificate and restart
    Renew {
        /// Nickname of the renewed certificate
        nickname: String,
    },
    /// Block until the subsystem reports running
    WaitReady {
        /// Give up after this many seconds (default: [readiness] timeout_secs)
        #[arg(long, value_name = "SECONDS")]
        timeout: Option<u64>,
    },
    /// Poll the subsystem status once
    Status,
}

#[derive(Args, Debug, Default)]
pub struct InstallArgs {
    /// Install the first CA of the domain
    #[arg(long, conflicts_with = "join")]
    pub first: bool,

    /// Join an existing CA as a replica
    #[arg(long)]
    pub join: bool,

    /// Kerberos realm of the domain
    #[arg(long)]
    pub realm: Option<String>,

    /// Base for certificate subjects (default: O=<REALM>)
    #[arg(long, value_name = "DN")]
    pub subject_base: Option<String>,

    /// Subject of the CA signing certificate
    #[arg(long, value_name = "DN")]
    pub ca_subject: Option<String>,

    /// Issue certificates with random serial numbers
    #[arg(long)]
    pub random_serial_numbers: bool,

    /// Sign the CA with an external CA: write a CSR and stop
    #[arg(long)]
    pub external_ca: bool,

    /// Kind of external CA
    #[arg(long, value_enum, value_name = "TYPE")]
    pub external_ca_type: Option<ExternalCaKind>,

    /// Certificate template requested from an ms-cs external CA
    #[arg(long, value_name = "PROFILE")]
    pub external_ca_profile: Option<String>,

    /// Signed CA certificate and its chain (repeatable)
    #[arg(long, value_name = "PATH")]
    pub external_cert_file: Vec<PathBuf>,

    /// Hardware token holding the CA keys
    #[arg(long, value_name = "NAME")]
    pub token_name: Option<String>,

    /// PKCS#11 module of the hardware token
    #[arg(long, value_name = "PATH")]
    pub token_library_path: Option<PathBuf>,

    /// Hardware token password
    #[arg(long, value_name = "PASSWORD", conflicts_with = "token_password_file")]
    pub token_password: Option<String>,

    /// File holding the hardware token password
    #[arg(long, value_name = "PATH")]
    pub token_password_file: Option<PathBuf>,

    /// Domain administrator password (needed to join)
    #[arg(long, env = "KURA_ADMIN_PASSWORD", hide_env_values = true, value_name = "PASSWORD")]
    pub admin_password: Option<String>,

    /// CA host to replicate from
    #[arg(long, value_name = "HOST")]
    pub peer: Option<String>,

    /// Never prompt; missing input is fatal
    #[arg(long, short = 'U')]
    pub unattended: bool,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExternalCaKind {
    Generic,
    #[value(name = "ms-cs")]
    MsCs,
}

impl From<ExternalCaKind> for ExternalCaType {
    fn from(kind: ExternalCaKind) -> Self {
        match kind {
            ExternalCaKind::Generic => ExternalCaType::Generic,
            ExternalCaKind::MsCs => ExternalCaType::MsCs,
        }
    }
}

impl InstallArgs {
    /// Operator input for the orchestrator. `realm` falls back to the
    /// settings file when the flag is absent.
    pub fn to_config(&self, configured_realm: Option<&str>) -> InstallConfig {
        let role = if self.first {
            RoleRequest::First
        } else if self.join {
            RoleRequest::Join
        } else {
            RoleRequest::Auto
        };
        InstallConfig {
            role,
            realm: self
                .realm
                .clone()
                .or_else(|| configured_realm.map(str::to_string)),
            subject_base: self.subject_base.clone(),
            ca_subject: self.ca_subject.clone(),
            serial_mode: if self.random_serial_numbers {
                SerialMode::Random
            } else {
                SerialMode::Sequential
            },
            external_ca: self.external_ca,
            external_ca_type: self.external_ca_type.map(Into::into),
            external_ca_profile: self.external_ca_profile.clone(),
            external_cert_files: self.external_cert_file.clone(),
            token: TokenOptions {
                name: self.token_name.clone(),
                library_path: self.token_library_path.clone(),
                password: self.token_password.as_deref().map(Secret::new),
                password_file: self.token_password_file.clone(),
            },
            admin_password: self.admin_password.as_deref().map(Secret::new),
            peer: self.peer.clone(),
        }
    }
}
