use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Result;
use chuju_quiz::data::{parse_all, parse_difficulty, parse_history_filter};
use chuju_quiz::{QuizConfig, SortDirection, SortKey};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod api;
mod auth;
mod commands;
mod config;
mod helpers;
mod play;
#[cfg(test)]
mod stub_server;
mod terminal;

use api::{ApiClient, ApiError, Feedback, FeedbackKind};
use auth::TokenStore;
use config::{ApiOptions, Config};
use terminal::Terminal;

#[derive(Parser)]
#[clap(name = "chuju", version, about = "中受クイズ")]
struct QuizCli {
    #[clap(flatten)]
    api: ApiOptions,

    #[clap(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Log in and remember the session token
    Login {
        #[clap(short, long, value_parser)]
        name: String,
        #[clap(long, env = "CHUJU_PASSWORD", hide_env_values = true, value_parser)]
        password: Option<String>,
    },
    /// Create an account
    Signup {
        #[clap(short, long, value_parser)]
        name: String,
        #[clap(long, env = "CHUJU_PASSWORD", hide_env_values = true, value_parser)]
        password: Option<String>,
    },
    /// Forget the stored session token
    Logout,
    /// Answer a configured set of quizzes
    Play {
        #[clap(long, value_parser, default_value = "all")]
        subject: String,
        #[clap(long, value_parser, default_value = "all")]
        unit: String,
        /// 2-5, or "mix" for any difficulty
        #[clap(long, value_parser, default_value = "mix")]
        difficulty: String,
        #[clap(short, long, value_parser, default_value = "10")]
        count: String,
        /// "unanswered", "uncorrected" or "all"
        #[clap(long, value_parser, default_value = "all")]
        history_filter: String,
        /// "classic", "soft", "retro" or "none"
        #[clap(long, value_parser, default_value = "none")]
        sound: String,
        /// Also write the played sound effects as raw mono f32le PCM
        #[clap(long, value_parser, value_name = "PATH")]
        sound_out: Option<PathBuf>,
    },
    /// List quizzes with your answer statistics
    List {
        #[clap(long, value_parser, default_value = "all")]
        subject: String,
        #[clap(long, value_parser, default_value = "all")]
        unit: String,
        #[clap(long, value_parser, default_value = "all")]
        difficulty: String,
        #[clap(long, value_parser, default_value = "all")]
        history_filter: String,
        /// none, question, subject, unit, difficulty, answers, accuracy or order
        #[clap(long, value_parser, default_value = "none")]
        sort: String,
        #[clap(long)]
        desc: bool,
    },
    /// List subjects
    Categories,
    /// List the units of a subject
    Units {
        #[clap(value_parser)]
        subject: String,
    },
    /// Show your overall statistics
    Stats,
    /// Show your answer history, optionally for one quiz
    History {
        #[clap(long, value_parser)]
        quiz: Option<String>,
    },
    DeleteAnswer {
        #[clap(value_parser)]
        id: String,
        #[clap(short, long)]
        yes: bool,
    },
    DeleteQuiz {
        #[clap(value_parser)]
        id: String,
        #[clap(short, long)]
        yes: bool,
    },
    /// Create a quiz from a JSON file
    CreateQuiz {
        #[clap(value_parser, value_name = "PATH")]
        draft: PathBuf,
    },
    /// Send feedback to the maintainers
    Feedback {
        #[clap(long, value_enum, default_value = "other")]
        kind: FeedbackKind,
        #[clap(short, long, value_parser)]
        message: String,
        #[clap(long, value_parser)]
        subject: Option<String>,
        #[clap(long, value_parser)]
        quiz: Option<String>,
    },
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "chuju_quiz=info,chuju=info".into()),
        )
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> ExitCode {
    #[cfg(feature = "env-file")]
    dotenvy::dotenv().ok();

    init_tracing();

    let cli = QuizCli::parse();
    let config = Config::from(cli.api);

    let mut store = match TokenStore::load(config.session_file.clone()) {
        Ok(store) => store,
        Err(error) => {
            eprintln!("error: {error:#}");
            return ExitCode::FAILURE;
        }
    };

    let forget_on_unauthorized = forgets_session_on_unauthorized(&cli.command);
    let result = run(cli.command, &config, &mut store).await;

    finish(result, &mut store, forget_on_unauthorized)
}

/// A rejected login says nothing about the session already stored.
fn forgets_session_on_unauthorized(command: &Command) -> bool {
    !matches!(command, Command::Login { .. })
}

fn finish(
    result: Result<()>,
    store: &mut TokenStore,
    forget_on_unauthorized: bool,
) -> ExitCode {
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) if forget_on_unauthorized && is_unauthorized(&error) => {
            if let Err(clear_error) = store.clear() {
                tracing::warn!(error = %clear_error, "failed to clear session");
            }

            eprintln!("{error:#}");
            eprintln!("もう一度ログインしてください: chuju login --name <NAME>");
            ExitCode::from(2)
        }
        Err(error) => {
            eprintln!("error: {error:#}");
            ExitCode::FAILURE
        }
    }
}

fn is_unauthorized(error: &anyhow::Error) -> bool {
    error
        .downcast_ref::<ApiError>()
        .map_or(false, ApiError::is_unauthorized)
}

async fn run(command: Command, config: &Config, store: &mut TokenStore) -> Result<()> {
    let api = ApiClient::new(config.base_url.clone(), config.anon_key.clone())?
        .with_token(store.token());
    let mut terminal = Terminal::new();

    match command {
        Command::Login { name, password } => {
            commands::login(&api, store, &mut terminal, &name, password).await
        }
        Command::Signup { name, password } => {
            commands::signup(&api, &mut terminal, &name, password).await
        }
        Command::Logout => commands::logout(store),
        Command::Play {
            subject,
            unit,
            difficulty,
            count,
            history_filter,
            sound,
            sound_out,
        } => {
            let quiz_config = QuizConfig::from_selection(
                &subject,
                &unit,
                &difficulty,
                &count,
                &history_filter,
                &sound,
            )?;

            play::play(
                Arc::new(api),
                &mut terminal,
                quiz_config,
                sound_out.as_deref(),
            )
            .await
        }
        Command::List {
            subject,
            unit,
            difficulty,
            history_filter,
            sort,
            desc,
        } => {
            let options = commands::ListOptions {
                subject: parse_all(&subject),
                unit: parse_all(&unit),
                difficulty: parse_difficulty(&difficulty)?,
                history: parse_history_filter(&history_filter)?,
                sort: sort.parse::<SortKey>()?,
                direction: if desc {
                    SortDirection::Descending
                } else {
                    SortDirection::Ascending
                },
            };

            commands::list(&api, options).await
        }
        Command::Categories => commands::categories(&api).await,
        Command::Units { subject } => commands::units(&api, &subject).await,
        Command::Stats => commands::stats(&api).await,
        Command::History { quiz } => commands::history(&api, quiz.as_deref()).await,
        Command::DeleteAnswer { id, yes } => {
            commands::delete_answer(&api, &mut terminal, &id, yes).await
        }
        Command::DeleteQuiz { id, yes } => {
            commands::delete_quiz(&api, &mut terminal, &id, yes).await
        }
        Command::CreateQuiz { draft } => commands::create_quiz(&api, &draft).await,
        Command::Feedback {
            kind,
            message,
            subject,
            quiz,
        } => {
            let feedback = Feedback {
                kind,
                subject,
                message,
                page_context: "cli".to_owned(),
                quiz_id: quiz,
            };

            commands::feedback(&api, feedback).await
        }
    }
}

#[cfg(test)]
mod tests {
    use secrecy::SecretString;

    use super::*;

    fn logged_in_store(dir: &tempfile::TempDir) -> TokenStore {
        let mut store = TokenStore::load(dir.path().join("session.json")).unwrap();
        store
            .set(SecretString::new("token-1".to_owned()), "taro".to_owned())
            .unwrap();
        store
    }

    #[test]
    fn rejected_session_is_forgotten() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = logged_in_store(&dir);

        finish(
            Err(ApiError::Unauthorized("jwt expired".to_owned()).into()),
            &mut store,
            true,
        );

        assert!(store.token().is_none());
        assert!(!store.path().exists());
    }

    #[test]
    fn failed_login_keeps_the_stored_session() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = logged_in_store(&dir);

        finish(
            Err(ApiError::Unauthorized("invalid password".to_owned()).into()),
            &mut store,
            false,
        );

        assert!(store.token().is_some());
        assert!(store.path().exists());
    }

    #[test]
    fn other_failures_keep_the_session() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = logged_in_store(&dir);

        finish(Err(anyhow::anyhow!("disk full")), &mut store, true);

        assert!(store.token().is_some());
    }

    fn parse(args: &[&str]) -> Command {
        let base = ["chuju", "--base-url", "http://127.0.0.1/", "--anon-key", "k"];

        QuizCli::parse_from(base.iter().chain(args)).command
    }

    #[test]
    fn only_login_is_exempt_from_forced_logout() {
        assert!(!forgets_session_on_unauthorized(&parse(&[
            "login", "--name", "taro", "--password", "x"
        ])));
        assert!(forgets_session_on_unauthorized(&parse(&["stats"])));
        assert!(forgets_session_on_unauthorized(&parse(&["play"])));
    }
}
