use std::collections::HashMap;
use std::future::Future;
use std::path::Path;

use anyhow::{bail, Context, Result};
use chrono::Local;
use chuju_quiz::history::{aggregate, answers_for_quiz, group_by_quiz, normalize};
use chuju_quiz::{
    build_quiz_list, AnswerRecord, QuizDraft, QuizListFilter, QuizStat, SortDirection, SortKey,
    UnitSelector,
};

use crate::api::{ApiClient, ApiError, Feedback, QuizQuery};
use crate::auth::TokenStore;
use crate::helpers::read_json;
use crate::terminal::Terminal;

/// Informational loads degrade to an empty result. Authorization failures still propagate.
pub async fn load_or_default<T: Default>(
    what: &str,
    load: impl Future<Output = Result<T, ApiError>>,
) -> Result<T, ApiError> {
    match load.await {
        Ok(value) => Ok(value),
        Err(error) if error.is_unauthorized() => Err(error),
        Err(error) => {
            tracing::error!(%error, "failed to load {what}");
            Ok(T::default())
        }
    }
}

async fn password(terminal: &mut Terminal, password: Option<String>) -> Result<String> {
    match password {
        Some(password) => Ok(password),
        None => terminal
            .ask("password: ")
            .await?
            .map(|password| password.trim_end().to_owned())
            .context("no password given"),
    }
}

pub async fn login(
    api: &ApiClient,
    store: &mut TokenStore,
    terminal: &mut Terminal,
    name: &str,
    password_arg: Option<String>,
) -> Result<()> {
    let password = password(terminal, password_arg).await?;
    let response = api.login(name, &password).await?;
    let user_name = response.user.name.clone();

    store.set(response.access_token, user_name.clone())?;
    tracing::info!(user = %user_name, session = %store.path().display(), "logged in");
    println!("ログインしました: {user_name}");

    Ok(())
}

pub async fn signup(
    api: &ApiClient,
    terminal: &mut Terminal,
    name: &str,
    password_arg: Option<String>,
) -> Result<()> {
    let password = password(terminal, password_arg).await?;
    api.signup(name, &password).await?;

    println!("アカウントを作成しました。`chuju login --name {name}` でログインしてください。");

    Ok(())
}

pub fn logout(store: &mut TokenStore) -> Result<()> {
    let user = store.user_name().map(str::to_owned);
    store.clear()?;

    match user {
        Some(user) => println!("ログアウトしました: {user}"),
        None => println!("ログインしていません"),
    }

    Ok(())
}

pub async fn categories(api: &ApiClient) -> Result<()> {
    let categories = load_or_default("categories", api.get_categories()).await?;

    if categories.is_empty() {
        println!("カテゴリがありません");
    }

    for category in categories {
        println!("{}", category.name);
    }

    Ok(())
}

pub async fn units(api: &ApiClient, subject: &str) -> Result<()> {
    let units = load_or_default("units", api.get_units(subject)).await?;

    if units.is_empty() {
        println!("{subject}: 単元がありません");
    }

    for unit in units {
        println!("{}", unit.name);
    }

    Ok(())
}

pub async fn stats(api: &ApiClient) -> Result<()> {
    let response = load_or_default("stats", api.get_stats()).await?;
    let stats = response.stats;

    if let Some(user) = response.user {
        println!("ユーザー: {}", user.name);
    }
    println!("解いたクイズ: {}", stats.total_quizzes);
    println!("回答数: {}", stats.total_answers);
    println!("正解数: {}", stats.total_correct);
    println!("正答率: {}", stats.accuracy());

    Ok(())
}

pub async fn history(api: &ApiClient, quiz_id: Option<&str>) -> Result<()> {
    let raw = load_or_default("history", api.get_history()).await?;
    let stats = aggregate(&raw);
    let records = normalize(&raw);

    if records.is_empty() {
        println!("回答履歴がありません");
        return Ok(());
    }

    match quiz_id {
        Some(quiz_id) => {
            let stat = stats.get(quiz_id).copied().unwrap_or_default();
            print_attempts(quiz_id, &stat, &answers_for_quiz(&records, quiz_id));
        }
        None => {
            for (quiz_id, attempts) in group_by_quiz(records) {
                let stat = stats.get(&quiz_id).copied().unwrap_or_default();
                print_attempts(&quiz_id, &stat, &attempts);
            }
        }
    }

    Ok(())
}

fn print_attempts(quiz_id: &str, stat: &QuizStat, attempts: &[AnswerRecord]) {
    println!(
        "{quiz_id}  回答 {} / 正解 {} / 正答率 {}",
        stat.answers,
        stat.correct,
        stat.accuracy()
    );

    for attempt in attempts {
        let mark = if attempt.is_correct { "○" } else { "×" };
        let answered_at = attempt
            .answered_at
            .map(|t| t.with_timezone(&Local).format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_else(|| "-".to_owned());

        println!(
            "  {mark} {answered_at}  {}  [{}]",
            attempt.user_answer,
            attempt.id.as_deref().unwrap_or("-")
        );
    }
}

pub struct ListOptions {
    pub subject: Option<String>,
    pub unit: Option<String>,
    pub difficulty: Option<u8>,
    pub history: Option<chuju_quiz::HistoryFilter>,
    pub sort: SortKey,
    pub direction: SortDirection,
}

pub async fn list(api: &ApiClient, options: ListOptions) -> Result<()> {
    if options.history.is_some() && !api.is_logged_in() {
        bail!("履歴フィルタを使うにはログインが必要です");
    }

    let mut selector = UnitSelector::new();

    if let Some(request) = selector.select_subject(options.subject.clone()) {
        let units = load_or_default("units", api.get_units(&request.subject)).await?;
        selector.apply_units(&request, units);
    }

    if options.unit.is_some() && !selector.select_unit(options.unit.clone()) {
        tracing::warn!(
            unit = options.unit.as_deref().unwrap_or_default(),
            "unit does not belong to the selected subject, showing all units"
        );
    }

    let quizzes = load_or_default("quizzes", api.get_quizzes(&QuizQuery::default())).await?;
    let stats: HashMap<String, QuizStat> = if api.is_logged_in() {
        aggregate(&load_or_default("history", api.get_history()).await?)
    } else {
        HashMap::new()
    };

    let filter = QuizListFilter {
        subject: selector.subject().map(str::to_owned),
        unit: selector.unit().map(str::to_owned),
        difficulty: options.difficulty,
        history: options.history,
    };
    let entries = build_quiz_list(&quizzes, &stats, &filter, options.sort, options.direction);

    if entries.is_empty() {
        println!("該当するクイズがありません");
    }

    for entry in &entries {
        let quiz = &entry.quiz;
        println!(
            "{}\t{}\t{}\t{}\t{}\t{}\t{}",
            quiz.id,
            quiz.subject.as_deref().unwrap_or("-"),
            quiz.unit.as_deref().unwrap_or("-"),
            quiz.difficulty
                .map_or_else(|| "-".to_owned(), |d| d.to_string()),
            entry.stat.answers,
            entry.accuracy,
            quiz.question.chars().take(40).collect::<String>()
        );
    }

    tracing::debug!(shown = entries.len(), total = quizzes.len(), "listed quizzes");

    Ok(())
}

pub async fn delete_answer(
    api: &ApiClient,
    terminal: &mut Terminal,
    id: &str,
    yes: bool,
) -> Result<()> {
    if !yes && !terminal.confirm(&format!("回答 {id} を削除しますか？")).await? {
        println!("キャンセルしました");
        return Ok(());
    }

    api.delete_answer(id)
        .await
        .with_context(|| format!("回答 {id} を削除できませんでした"))?;
    println!("回答 {id} を削除しました");

    Ok(())
}

pub async fn delete_quiz(
    api: &ApiClient,
    terminal: &mut Terminal,
    id: &str,
    yes: bool,
) -> Result<()> {
    if !yes && !terminal.confirm(&format!("クイズ {id} を削除しますか？")).await? {
        println!("キャンセルしました");
        return Ok(());
    }

    api.delete_quiz(id)
        .await
        .with_context(|| format!("クイズ {id} を削除できませんでした"))?;
    println!("クイズ {id} を削除しました");

    Ok(())
}

pub async fn create_quiz(api: &ApiClient, draft_path: &Path) -> Result<()> {
    let draft: QuizDraft = read_json(draft_path)?;
    draft
        .check()
        .with_context(|| format!("{} is not a valid quiz", draft_path.display()))?;

    let id = api.create_quiz(&draft).await?;
    tracing::info!(%id, "created quiz");
    println!("クイズを作成しました: {id}");

    Ok(())
}

pub async fn feedback(api: &ApiClient, feedback: Feedback) -> Result<()> {
    if feedback.message.trim().is_empty() {
        bail!("メッセージを入力してください");
    }

    api.submit_feedback(&feedback).await?;
    println!("フィードバックを送信しました");

    Ok(())
}
