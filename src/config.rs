use std::path::PathBuf;

use clap::Args;
use once_cell::sync::Lazy;
use secrecy::SecretString;
use url::Url;

static DEFAULT_SESSION_FILE: Lazy<String> = Lazy::new(|| match std::env::var_os("HOME") {
    Some(home) => PathBuf::from(home)
        .join(".chuju-quiz")
        .join("session.json")
        .display()
        .to_string(),
    None => ".chuju-quiz-session.json".to_owned(),
});

#[derive(Args, Debug)]
pub struct ApiOptions {
    /// Base URL of the quiz function gateway
    #[clap(long, env = "CHUJU_API_BASE_URL", value_parser, value_name = "URL")]
    base_url: Url,

    /// Public anon key used for requests that need no user identity
    #[clap(
        long,
        env = "CHUJU_ANON_KEY",
        hide_env_values = true,
        value_parser,
        value_name = "KEY"
    )]
    anon_key: String,

    /// Where the session token is kept between runs
    #[clap(
        long,
        env = "CHUJU_SESSION_FILE",
        value_parser,
        value_name = "PATH",
        default_value = DEFAULT_SESSION_FILE.as_str()
    )]
    session_file: PathBuf,
}

pub struct Config {
    pub base_url: Url,
    pub anon_key: SecretString,
    pub session_file: PathBuf,
}

impl From<ApiOptions> for Config {
    fn from(options: ApiOptions) -> Self {
        Self {
            base_url: options.base_url,
            anon_key: SecretString::new(options.anon_key),
            session_file: options.session_file,
        }
    }
}
