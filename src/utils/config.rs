#![forbid(unsafe_code)]

use anyhow::{Result, anyhow};
use log::{info, error, LevelFilter};
use serde::Deserialize;
use std::{fs, io::ErrorKind, path::Path};
use fs_mistrust::Mistrust;
use std::os::unix::fs::PermissionsExt;
use lazy_static::lazy_static;
use structopt::StructOpt;
use log4rs::append::console::ConsoleAppender;
use log4rs::config::{Appender, Config as LogConfig, Root};
use log4rs::encode::pattern::PatternEncoder;

// Server Utilities
use crate::utils::{greeting_utils, errors::Errors};

// ***************************************************************************
//                                Constants
// ***************************************************************************
// Directory and file locations. Unless otherwise noted, all files and directories
// are relative to the root directory.
const DEFAULT_ROOT_DIR     : &str = "~/.greeting";
const CONFIG_DIR           : &str = "/config";
const LOGS_DIR             : &str = "/logs";
const CERTS_DIR            : &str = "/certs";
const LOG4RS_CONFIG_FILE   : &str = "/log4rs.yml";    // relative to config dir
const SERVER_CONFIG_FILE   : &str = "/greeting.toml"; // relative to config dir
const TLS_KEY_FILE         : &str = "/key.pem";       // relative to certs dir
const TLS_CERT_FILE        : &str = "/cert.pem";      // relative to certs dir

// Console logging used when no log4rs.yml is installed.
const FALLBACK_LOG_PATTERN : &str = "{d(%Y-%m-%d %H:%M:%S%.3f)} {h({l})} {t} - {m}{n}";

// Networking.
const DEFAULT_TITLE        : &str = "Greeting Server";
const DEFAULT_HTTP_ADDR    : &str = "http://localhost";
const DEFAULT_HTTP_PORT    : u16  = 8080;

// ***************************************************************************
//                             Static Variables
// ***************************************************************************
// Assign the command line arguments BEFORE the runtime context is initialized in main.
lazy_static! {
    pub static ref GREETING_ARGS: GreetingArgs = init_greeting_args();
}

// ***************************************************************************
//                             Directory Structs
// ***************************************************************************
// ---------------------------------------------------------------------------
// GreetingDirs:
// ---------------------------------------------------------------------------
#[derive(Debug, Clone)]
#[allow(dead_code)]
pub struct GreetingDirs {
    pub root_dir: String,
    pub config_dir: String,
    pub logs_dir: String,
    pub certs_dir: String,
}

// ***************************************************************************
//                               Config Structs
// ***************************************************************************
// ---------------------------------------------------------------------------
// GreetingArgs:
// ---------------------------------------------------------------------------
#[derive(Debug, StructOpt)]
#[structopt(name = "greeting_args", about = "Command line arguments for the Greeting Server.")]
pub struct GreetingArgs {
    /// Specify the server's root data directory.
    ///
    /// This directory contains the config, logs and certs subdirectories.
    /// When not set, ~/.greeting is used.
    #[structopt(short, long)]
    pub root_dir: Option<String>,

    /// Port the HTTP listener binds, overrides the configuration file.
    #[structopt(short, long)]
    pub port: Option<u16>,

    /// Create the data directories and then exit.
    #[structopt(short, long)]
    pub create_dirs_only: bool,
}

// ---------------------------------------------------------------------------
// Parms:
// ---------------------------------------------------------------------------
#[derive(Debug)]
#[allow(dead_code)]
pub struct Parms {
    pub config_file: String,
    pub config: Config,
}

// ---------------------------------------------------------------------------
// RuntimeCtx:
// ---------------------------------------------------------------------------
#[derive(Debug)]
#[allow(dead_code)]
pub struct RuntimeCtx {
    pub parms: Parms,
    pub args: &'static GreetingArgs,
    pub dirs: GreetingDirs,
}

impl RuntimeCtx {
    /// The TLS key and certificate file paths, in that order.
    pub fn tls_files(&self) -> (String, String) {
        (self.dirs.certs_dir.clone() + TLS_KEY_FILE,
         self.dirs.certs_dir.clone() + TLS_CERT_FILE)
    }
}

// ---------------------------------------------------------------------------
// Config:
// ---------------------------------------------------------------------------
/** The contents of greeting.toml.  Every field is optional in the file. */
#[derive(Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    pub title: String,
    pub http_addr: String,
    pub http_port: u16,
    /// Public base URL used in hypermedia links, e.g. https://api.example.org.
    pub external_url: Option<String>,
    pub tls_enabled: bool,
}

impl Config {
    pub fn new() -> Self {
        Config::default()
    }

    /// The scheme clients use to reach this server.
    pub fn scheme(&self) -> &'static str {
        if self.tls_enabled {"https"} else {"http"}
    }

    /// Base URL used for links when the request carries no usable host.
    pub fn default_base_url(&self) -> String {
        format!("{}:{}", self.http_addr.trim_end_matches('/'), self.http_port)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            title: DEFAULT_TITLE.to_string(),
            http_addr: DEFAULT_HTTP_ADDR.to_string(),
            http_port: DEFAULT_HTTP_PORT,
            external_url: None,
            tls_enabled: false,
        }
    }
}

// ***************************************************************************
//                            Directory Functions
// ***************************************************************************
// ---------------------------------------------------------------------------
// init_greeting_args:
// ---------------------------------------------------------------------------
/** Get the command line arguments. */
fn init_greeting_args() -> GreetingArgs {
    GreetingArgs::from_args()
}

// ---------------------------------------------------------------------------
// init_greeting_dirs:
// ---------------------------------------------------------------------------
/** Calculate the external data directories, creating any that don't exist. */
pub fn init_greeting_dirs(args: &GreetingArgs) -> Result<GreetingDirs> {
    let mistrust = get_mistrust()?;

    let root_dir = get_root_dir(args);
    check_greeting_dir(&root_dir, "root directory", &mistrust)?;

    let config_dir = root_dir.clone() + CONFIG_DIR;
    check_greeting_dir(&config_dir, "config directory", &mistrust)?;

    let logs_dir = root_dir.clone() + LOGS_DIR;
    check_greeting_dir(&logs_dir, "logs directory", &mistrust)?;

    let certs_dir = root_dir.clone() + CERTS_DIR;
    check_greeting_dir(&certs_dir, "certs directory", &mistrust)?;

    Ok(GreetingDirs { root_dir, config_dir, logs_dir, certs_dir })
}

// ---------------------------------------------------------------------------
// check_greeting_dir:
// ---------------------------------------------------------------------------
/** Check that the path is absolute and, if it exists, that it's a directory
 * with 0o700 permissions.  If it doesn't exist, create it.  The mistrust
 * package creates directories with 0o700 permissions.
 */
fn check_greeting_dir(dir: &str, msgname: &str, mistrust: &Mistrust) -> Result<()> {
    let path = Path::new(dir);
    if !path.is_absolute() {
        return Err(anyhow!(Errors::DataDirectory(dir.to_string(),
                           format!("the {} path must be absolute", msgname))));
    }

    if path.exists() {
        if !path.is_dir() {
            return Err(anyhow!(Errors::DataDirectory(dir.to_string(),
                               format!("the {} path must be a directory", msgname))));
        }
        let perm = path.metadata()?.permissions().mode();
        if perm & 0o777 != 0o700 {
            return Err(anyhow!(Errors::DataDirectory(dir.to_string(),
                               format!("the {} path must have 0o700 permissions", msgname))));
        }
    } else {
        mistrust.make_directory(path)
            .map_err(|e| anyhow!(Errors::DataDirectory(dir.to_string(), e.to_string())))?;
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// get_mistrust:
// ---------------------------------------------------------------------------
/** Configure a new mistrust object for initial directory processing. */
fn get_mistrust() -> Result<Mistrust> {
    Mistrust::builder()
        .ignore_prefix(greeting_utils::get_absolute_path("~"))
        .trust_group(0)
        .build()
        .map_err(|e| anyhow!("Mistrust configuration error: {}", e))
}

// ---------------------------------------------------------------------------
// get_root_dir:
// ---------------------------------------------------------------------------
fn get_root_dir(args: &GreetingArgs) -> String {
    // The command line wins over the default location.
    let root_dir = match &args.root_dir {
        Some(r) => r.clone(),
        None => DEFAULT_ROOT_DIR.to_string(),
    };
    greeting_utils::get_absolute_path(&root_dir)
}

// ***************************************************************************
//                               Log Functions
// ***************************************************************************
// ---------------------------------------------------------------------------
// init_log:
// ---------------------------------------------------------------------------
/** Initialize log4rs from the config directory's log4rs.yml, or fall back to
 * console logging at info level when that file isn't installed.
 */
pub fn init_log(dirs: &GreetingDirs) -> Result<()> {
    let logconfig = dirs.config_dir.clone() + LOG4RS_CONFIG_FILE;
    if Path::new(&logconfig).exists() {
        log4rs::init_file(&logconfig, Default::default())
            .map_err(|e| anyhow!("{}\n   {}", Errors::Log4rsInitialization(logconfig.clone()), e))?;
        info!("Log4rs initialized using: {}", logconfig);
        return Ok(());
    }

    let stdout = ConsoleAppender::builder()
        .encoder(Box::new(PatternEncoder::new(FALLBACK_LOG_PATTERN)))
        .build();
    let config = LogConfig::builder()
        .appender(Appender::builder().build("stdout", Box::new(stdout)))
        .build(Root::builder().appender("stdout").build(LevelFilter::Info))?;
    log4rs::init_config(config)?;
    info!("No log configuration at {}, logging to the console.", logconfig);
    Ok(())
}

// ***************************************************************************
//                             Parms Functions
// ***************************************************************************
// ---------------------------------------------------------------------------
// get_parms:
// ---------------------------------------------------------------------------
/** Retrieve the application parameters from the configuration file in the
 * config directory.  Default values are used when the file doesn't exist.
 * Command line settings are applied last.
 */
fn get_parms(dirs: &GreetingDirs, args: &GreetingArgs) -> Result<Parms> {
    let config_file = dirs.config_dir.clone() + SERVER_CONFIG_FILE;
    let mut parms = read_parms(&config_file)?;
    apply_args(&mut parms.config, args);
    Ok(parms)
}

// ---------------------------------------------------------------------------
// read_parms:
// ---------------------------------------------------------------------------
/** Only a missing file falls back to the defaults; any other read failure
 * is returned.
 */
fn read_parms(config_file: &str) -> Result<Parms> {
    info!("{}", Errors::ReadingConfigFile(config_file.to_string()));

    match fs::read_to_string(config_file) {
        Ok(contents) => Ok(Parms { config: parse_config(&contents, config_file)?,
                                   config_file: config_file.to_string() }),
        Err(e) if e.kind() == ErrorKind::NotFound => {
            info!("No configuration at {}. Using default values.", config_file);
            Ok(Parms { config_file: Default::default(), config: Config::new() })
        }
        Err(e) => {
            let msg = format!("{}\n   {}", Errors::ReadingConfigFile(config_file.to_string()), e);
            error!("{}", msg);
            Err(anyhow!(msg))
        }
    }
}

// ---------------------------------------------------------------------------
// parse_config:
// ---------------------------------------------------------------------------
fn parse_config(contents: &str, config_file: &str) -> Result<Config> {
    match toml::from_str(contents) {
        Ok(c)  => Ok(c),
        Err(e) => {
            let msg = format!("{}\n   {}", Errors::TOMLParseError(config_file.to_string()), e);
            error!("{}", msg);
            Err(anyhow!(msg))
        }
    }
}

// ---------------------------------------------------------------------------
// apply_args:
// ---------------------------------------------------------------------------
fn apply_args(config: &mut Config, args: &GreetingArgs) {
    if let Some(port) = args.port {
        config.http_port = port;
    }
}

// ***************************************************************************
//                             Config Functions
// ***************************************************************************
// ---------------------------------------------------------------------------
// init_runtime_context:
// ---------------------------------------------------------------------------
/** Read the configuration.  Logging must already be initialized. */
pub fn init_runtime_context(dirs: GreetingDirs) -> Result<RuntimeCtx> {
    let parms = get_parms(&dirs, &GREETING_ARGS)?;
    Ok(RuntimeCtx { parms, args: &GREETING_ARGS, dirs })
}
