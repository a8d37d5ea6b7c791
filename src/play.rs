use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use chuju_quiz::session::SessionError;
use chuju_quiz::sound::{self, SoundEffect, SoundTheme};
use chuju_quiz::{Advance, Phase, Quiz, QuizConfig, QuizSession};
use tokio::task::JoinSet;

use crate::api::{ApiClient, ApiError, QuizQuery};
use crate::commands::{self, load_or_default};
use crate::terminal::Terminal;

const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Outcome saves run in the background; the local score never waits on them.
struct Persistence {
    api: Arc<ApiClient>,
    pending: JoinSet<Result<(), ApiError>>,
}

impl Persistence {
    fn new(api: Arc<ApiClient>) -> Self {
        Self {
            api,
            pending: JoinSet::new(),
        }
    }

    fn save_answer(&mut self, outcome: chuju_quiz::AnswerOutcome) {
        if !self.api.is_logged_in() {
            tracing::debug!(quiz_id = %outcome.quiz_id, "not logged in, answer not saved");
            return;
        }

        let api = Arc::clone(&self.api);
        self.pending.spawn(async move {
            api.save_answer(&outcome).await.map_err(|error| {
                tracing::warn!(quiz_id = %outcome.quiz_id, %error, "failed to save answer");
                error
            })
        });
    }

    fn complete(&mut self, completion: chuju_quiz::Completion) {
        if !self.api.is_logged_in() {
            return;
        }

        let api = Arc::clone(&self.api);
        self.pending.spawn(async move {
            api.complete_quiz(&completion).await.map_err(|error| {
                tracing::warn!(%error, "failed to record quiz completion");
                error
            })
        });
    }

    /// Waits up to `limit` for outstanding saves, or until Ctrl-C, then drops
    /// the rest. Returns the first authorization failure, if any.
    async fn drain(&mut self, limit: Duration) -> Option<ApiError> {
        let mut unauthorized = None;

        let wait = tokio::time::timeout(limit, join_all(&mut self.pending, &mut unauthorized));

        let finished = tokio::select! {
            joined = wait => joined.is_ok(),
            _ = tokio::signal::ctrl_c() => false,
        };

        if !finished {
            tracing::warn!(pending = self.pending.len(), "abandoning unsaved results");
            self.pending.shutdown().await;
        }

        unauthorized
    }
}

async fn join_all(
    pending: &mut JoinSet<Result<(), ApiError>>,
    unauthorized: &mut Option<ApiError>,
) {
    while let Some(joined) = pending.join_next().await {
        match joined {
            Ok(Err(error)) if error.is_unauthorized() && unauthorized.is_none() => {
                *unauthorized = Some(error);
            }
            Ok(_) => {}
            Err(error) => tracing::warn!(%error, "save task did not finish"),
        }
    }
}

struct Sounds {
    theme: Option<SoundTheme>,
    last: Instant,
}

impl Sounds {
    fn new(theme: Option<SoundTheme>) -> Self {
        Self {
            theme,
            last: Instant::now(),
        }
    }

    fn play(&mut self, effect: SoundEffect) {
        let Some(theme) = self.theme else {
            return;
        };

        let elapsed = self.last.elapsed().as_secs_f64();
        self.last = Instant::now();

        sound::with_output(|output| output.advance(elapsed));
        sound::play(theme, effect);
    }
}

enum Step {
    Continue,
    Quit,
}

pub async fn play(
    api: Arc<ApiClient>,
    terminal: &mut Terminal,
    config: QuizConfig,
    sound_out: Option<&Path>,
) -> Result<()> {
    let mut persistence = Persistence::new(Arc::clone(&api));
    let mut sounds = Sounds::new(config.sound);

    let result = tokio::select! {
        result = run(&api, terminal, &config, &mut persistence, &mut sounds) => result,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("interrupted, abandoning the session");
            Ok(())
        }
    };

    let unauthorized = persistence.drain(DRAIN_TIMEOUT).await;

    if let Some(path) = sound_out {
        write_sound(path)?;
    }

    result?;

    match unauthorized {
        Some(error) => Err(error.into()),
        None => Ok(()),
    }
}

async fn run(
    api: &ApiClient,
    terminal: &mut Terminal,
    config: &QuizConfig,
    persistence: &mut Persistence,
    sounds: &mut Sounds,
) -> Result<()> {
    let mut session = QuizSession::new();

    loop {
        let quizzes = fetch(api, config).await?;

        match session.start(config.clone(), quizzes) {
            Ok(()) => {}
            Err(SessionError::NoQuizzes) => {
                println!("条件に合うクイズがありません");
                return Ok(());
            }
            Err(error) => return Err(error.into()),
        }

        while session.phase() != Phase::Completed {
            if let Step::Quit = ask_and_reveal(&mut session, terminal, persistence, sounds).await? {
                return Ok(());
            }

            terminal.ask("Enter で次へ ").await?;

            if let Advance::Completed(completion) = session.next()? {
                println!();
                println!(
                    "終了！ {} / {} 問正解 (正答率 {})",
                    completion.correct_count,
                    completion.total_questions,
                    completion.accuracy()
                );
                sounds.play(SoundEffect::Complete);
                persistence.complete(completion);
            }
        }

        let choice = terminal
            .ask("[r] もう一度  [s] 成績を見る  [q] 終了: ")
            .await?;

        match choice.as_deref().map(str::trim) {
            Some("r") => session.restart(),
            Some("s") => {
                if api.is_logged_in() {
                    commands::stats(api).await?;
                } else {
                    println!("成績を見るにはログインしてください");
                }
                return Ok(());
            }
            _ => return Ok(()),
        }
    }
}

async fn fetch(api: &ApiClient, config: &QuizConfig) -> Result<Vec<Quiz>, ApiError> {
    println!("読み込み中...");

    load_or_default("quizzes", api.get_quizzes(&QuizQuery::from(config))).await
}

async fn ask_and_reveal(
    session: &mut QuizSession,
    terminal: &mut Terminal,
    persistence: &mut Persistence,
    sounds: &mut Sounds,
) -> Result<Step> {
    let quiz = session
        .current_quiz()
        .cloned()
        .context("no current quiz")?;

    println!();
    println!(
        "第{}問 / {}問{}",
        session.current_index() + 1,
        session.total(),
        quiz.difficulty
            .map(|d| format!("  難易度 {}", "★".repeat(usize::from(d))))
            .unwrap_or_default()
    );
    println!("{}", quiz.question);

    if quiz.is_multiple_choice() {
        for (i, choice) in quiz.choices().iter().enumerate() {
            println!("  {}) {choice}", i + 1);
        }
    }

    while !session.can_reveal() {
        let prompt = if quiz.is_multiple_choice() {
            "番号を選んでください: "
        } else {
            "答え: "
        };
        let Some(line) = terminal.ask(prompt).await? else {
            return Ok(Step::Quit);
        };

        let selected = line
            .trim()
            .parse::<usize>()
            .ok()
            .filter(|_| quiz.is_multiple_choice())
            .and_then(|n| n.checked_sub(1));

        match selected {
            Some(index) => {
                if let Err(error) = session.select_choice(index) {
                    println!("{error}");
                }
            }
            None => session.set_answer(line)?,
        }
    }

    let outcome = session.reveal()?;

    if outcome.is_correct {
        println!("○ 正解！");
        sounds.play(SoundEffect::Correct);
    } else {
        println!("× 不正解");
        sounds.play(SoundEffect::Incorrect);
    }
    println!("答え: {}", quiz.answer);
    if !quiz.explanation.trim().is_empty() {
        println!("解説: {}", quiz.explanation);
    }

    persistence.save_answer(outcome);

    Ok(Step::Continue)
}

/// Writes everything played so far as raw mono f32le PCM.
fn write_sound(path: &Path) -> Result<()> {
    let (samples, sample_rate) =
        sound::with_output(|output| (output.render(), output.sample_rate()));

    let bytes = samples
        .iter()
        .flat_map(|sample| sample.to_le_bytes())
        .collect::<Vec<u8>>();

    std::fs::write(path, bytes).with_context(|| format!("writing {}", path.display()))?;
    tracing::info!(
        path = %path.display(),
        sample_rate,
        samples = samples.len(),
        "wrote sound effects"
    );

    Ok(())
}
