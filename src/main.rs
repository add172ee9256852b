//! Command-line front end for the forecasting agent.
//!
//! Commands: `test` (dry run), `submit`, `retrodict`, `tournament`, `loop`,
//! and `backfill-comments`. Hard failures print a one-line reason and exit
//! non-zero; skips (nothing to do) exit zero. The long-running loop mode
//! catches credit exhaustion and sleeps until the parsed reset time.

use anyhow::{Context, Result, bail};
use chrono::{Local, NaiveDate};
use clap::{Parser, Subcommand};
use forecast_agent::{
    Error, ForecastOutput, ForecastRequest, QuestionType, SavedForecast, Services, Settings,
    format_reasoning_comment, post_comment, run_forecast, submit_forecast,
};
use futures::StreamExt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_stream::wrappers::IntervalStream;

#[derive(Parser)]
#[command(name = "forecast", about = "Tournament forecasting agent", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run a forecast without submitting (dry run).
    Test {
        /// Metaculus post ID
        post_id: u64,
        /// Print model output as it arrives
        #[arg(long)]
        stream_thinking: bool,
    },
    /// Run a forecast and submit it to the platform.
    Submit {
        /// Metaculus post ID
        post_id: u64,
        /// Reuse the most recent saved forecast instead of re-running
        #[arg(long)]
        use_cache: bool,
        /// Also post the reasoning as a private comment
        #[arg(long)]
        comment: bool,
    },
    /// Forecast resolved questions blind as of a past date (calibration).
    Retrodict {
        /// Metaculus post IDs of resolved questions
        post_ids: Vec<u64>,
        /// The date to forecast as-of (YYYY-MM-DD)
        #[arg(long)]
        forecast_date: NaiveDate,
    },
    /// Forecast all open questions of a tournament.
    Tournament {
        /// Tournament ID or slug (e.g., 32916, minibench)
        tournament: String,
        /// List questions without forecasting
        #[arg(long, short = 'n')]
        dry_run: bool,
        /// Submit forecasts (default: save only)
        #[arg(long)]
        submit: bool,
        /// Maximum questions to process
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Repeatedly run tournaments on an interval.
    Loop {
        /// Tournament IDs or slugs
        tournaments: Vec<String>,
        /// Minutes between runs
        #[arg(long, short, default_value_t = 60)]
        interval: u64,
    },
    /// Post reasoning comments for submitted forecasts that lack one.
    BackfillComments {
        /// List forecasts without posting comments
        #[arg(long, short = 'n')]
        dry_run: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let services = Services::new(Settings::from_env());

    match cli.command {
        Command::Test {
            post_id,
            stream_thinking,
        } => cmd_test(services, post_id, stream_thinking).await,
        Command::Submit {
            post_id,
            use_cache,
            comment,
        } => cmd_submit(services, post_id, use_cache, comment).await,
        Command::Retrodict {
            post_ids,
            forecast_date,
        } => cmd_retrodict(services, post_ids, forecast_date).await,
        Command::Tournament {
            tournament,
            dry_run,
            submit,
            limit,
        } => cmd_tournament(services, &tournament, dry_run, submit, limit).await,
        Command::Loop {
            tournaments,
            interval,
        } => cmd_loop(services, tournaments, interval).await,
        Command::BackfillComments { dry_run } => cmd_backfill_comments(services, dry_run).await,
    }
}

fn display_forecast(output: &ForecastOutput) {
    println!("\n{}", output.question_title);
    println!("{}", "=".repeat(output.question_title.len().min(78)));
    if output.defaulted {
        println!("(defaulted: the model produced no valid structured output)");
    }
    match output.question_type {
        QuestionType::Binary | QuestionType::Date => {
            if let Some(p) = output.probability {
                println!("Probability: {:.1}%", p * 100.0);
            }
        }
        QuestionType::MultipleChoice => {
            if let Some(probabilities) = &output.probabilities {
                for (option, p) in probabilities {
                    println!("  {option}: {:.1}%", p * 100.0);
                }
            }
        }
        QuestionType::Numeric | QuestionType::Discrete => {
            if let Some(median) = output.median {
                println!("Median: {median}");
            }
            if let Some((low, high)) = output.confidence_interval {
                println!("90% CI: [{low}, {high}]");
            }
            if let Some(cdf) = &output.cdf {
                println!("CDF: {} points", cdf.len());
            }
        }
    }
    println!("\n{}", output.summary);
    if !output.factors.is_empty() {
        println!("\nFactors:");
        for factor in &output.factors {
            let sign = if factor.logit >= 0.0 { "+" } else { "" };
            println!("  [{sign}{:.1}] {}", factor.logit, factor.description);
        }
    }
    if let Some(duration) = output.duration_seconds {
        println!("\n({} sources, {duration:.0}s)", output.sources_consulted.len());
    }
}

/// Write the session's reasoning to `logs/<post_id>/<timestamp>.log`.
fn write_session_log(services: &Services, output: &ForecastOutput) -> Option<PathBuf> {
    let dir = services.settings.logs_path.join(output.post_id.to_string());
    std::fs::create_dir_all(&dir).ok()?;
    let path = dir.join(format!("{}.log", Local::now().format("%Y%m%d_%H%M%S")));
    std::fs::write(&path, &output.reasoning).ok()?;
    Some(path)
}

async fn cmd_test(services: Arc<Services>, post_id: u64, stream_thinking: bool) -> Result<()> {
    let mut request = ForecastRequest::for_post(post_id);
    request.stream_thinking = stream_thinking;

    let output = run_forecast(services.clone(), request)
        .await
        .with_context(|| format!("forecast failed for post {post_id}"))?;

    services.store.save(&output)?;
    let _ = write_session_log(&services, &output);
    display_forecast(&output);
    Ok(())
}

/// Rebuild a ForecastOutput from the latest saved record (for `--use-cache`).
fn saved_to_output(record: &SavedForecast, post_id: u64) -> ForecastOutput {
    let mut output = ForecastOutput::new(
        record.question_id,
        record.post_id.unwrap_or(post_id),
        record.question_title.clone(),
        record.question_type,
    );
    output.summary = record.summary.clone();
    output.probability = record.probability;
    output.logit = record.logit;
    output.probabilities = record.probabilities.clone();
    output.median = record.median;
    output.confidence_interval = record.confidence_interval;
    output.percentiles = record.percentiles.clone();
    output
}

async fn cmd_submit(
    services: Arc<Services>,
    post_id: u64,
    use_cache: bool,
    comment: bool,
) -> Result<()> {
    let (output, record_path) = if use_cache {
        let records = services.store.load_past(post_id)?;
        let record = records
            .last()
            .with_context(|| format!("no cached forecast for post {post_id}"))?;
        let mut output = saved_to_output(record, post_id);

        // A cached continuous forecast needs its CDF rebuilt from the
        // saved percentiles and the question's current bounds.
        if output.question_type.is_continuous() {
            let question = services.metaculus.get_question(post_id).await?;
            let bounds = question
                .bounds
                .with_context(|| format!("post {post_id} has no numeric bounds"))?;
            let percentiles = output
                .percentiles
                .clone()
                .context("cached forecast has no percentiles; re-run without --use-cache")?;
            output.cdf = Some(forecast_agent::numeric::percentiles_to_cdf(
                &percentiles,
                &bounds,
            )?);
            output.cdf_size = Some(bounds.effective_cdf_size());
        }

        let paths = services.store.record_paths(post_id)?;
        (output, paths.last().cloned())
    } else {
        let output = run_forecast(services.clone(), ForecastRequest::for_post(post_id))
            .await
            .with_context(|| format!("forecast failed for post {post_id}"))?;
        // Written before submission: a failed submission never loses the
        // forecast.
        let path = services.store.save(&output)?;
        let _ = write_session_log(&services, &output);
        (output, Some(path))
    };

    display_forecast(&output);

    submit_forecast(&services.settings, &output)
        .await
        .context("submission failed")?;
    println!("Submitted forecast for question {}", output.question_id);
    if let Some(path) = &record_path {
        services.store.mark_submitted(path)?;
    }

    if comment {
        let text = format_reasoning_comment(&output);
        post_comment(&services.settings, output.post_id, &text, true, true)
            .await
            .context("comment failed")?;
        println!("Posted reasoning comment on post {}", output.post_id);
        if let Some(path) = &record_path {
            services.store.mark_comment_posted(path)?;
        }
    }

    Ok(())
}

async fn cmd_retrodict(
    services: Arc<Services>,
    post_ids: Vec<u64>,
    forecast_date: NaiveDate,
) -> Result<()> {
    if post_ids.is_empty() {
        bail!("no post ids given");
    }

    let mut failures = 0usize;
    for post_id in &post_ids {
        println!("Retrodicting post {post_id} as of {forecast_date}...");
        let request = ForecastRequest::for_post(*post_id).with_retrodict(forecast_date);
        match run_forecast(services.clone(), request).await {
            Ok(output) => {
                services.store.save(&output)?;
                let _ = write_session_log(&services, &output);
                display_forecast(&output);
            }
            Err(e) => {
                eprintln!("Retrodict failed for post {post_id}: {e}");
                failures += 1;
            }
        }
    }

    if failures == post_ids.len() {
        bail!("all {failures} retrodict runs failed");
    }
    Ok(())
}

async fn cmd_tournament(
    services: Arc<Services>,
    tournament: &str,
    dry_run: bool,
    submit: bool,
    limit: Option<usize>,
) -> Result<()> {
    let questions = services
        .metaculus
        .get_open_tournament_questions(tournament, limit)
        .await
        .with_context(|| format!("failed to list tournament {tournament}"))?;

    let pending: Vec<_> = questions
        .iter()
        .filter(|q| q.my_last_forecast_time.is_none())
        .collect();

    println!(
        "Tournament {tournament}: {} open questions, {} without our forecast",
        questions.len(),
        pending.len()
    );
    if dry_run {
        for q in &pending {
            println!("  {} [{}] {}", q.post_id, q.question_type, q.title);
        }
        return Ok(());
    }
    if pending.is_empty() {
        println!("Nothing to forecast.");
        return Ok(());
    }

    for question in pending {
        println!("\nForecasting {}: {}", question.post_id, question.title);
        match run_forecast(services.clone(), ForecastRequest::for_post(question.post_id)).await
        {
            Ok(output) => {
                let path = services.store.save(&output)?;
                let _ = write_session_log(&services, &output);
                display_forecast(&output);
                if submit {
                    match submit_forecast(&services.settings, &output).await {
                        Ok(()) => {
                            services.store.mark_submitted(&path)?;
                            println!("Submitted question {}", output.question_id);
                        }
                        Err(e) => eprintln!(
                            "Submission failed for question {}: {e}",
                            output.question_id
                        ),
                    }
                }
            }
            // Credit exhaustion stops the pass; the loop command knows how
            // to wait it out.
            Err(e @ Error::CreditExhausted { .. }) => return Err(e.into()),
            Err(e) => eprintln!("Forecast failed for post {}: {e}", question.post_id),
        }
    }

    Ok(())
}

async fn wait_for_credit_reset(error: &Error) {
    let delay = match error {
        Error::CreditExhausted {
            reset_time: Some(reset),
            ..
        } => {
            let now = Local::now();
            (*reset - now).to_std().unwrap_or(Duration::from_secs(60))
        }
        _ => Duration::from_secs(3600),
    };
    println!(
        "Credits exhausted; sleeping {} minutes until reset.",
        delay.as_secs() / 60
    );
    tokio::time::sleep(delay + Duration::from_secs(60)).await;
}

async fn cmd_loop(services: Arc<Services>, tournaments: Vec<String>, interval: u64) -> Result<()> {
    if tournaments.is_empty() {
        bail!("no tournaments given");
    }

    let mut ticks = IntervalStream::new(tokio::time::interval(Duration::from_secs(
        interval.max(1) * 60,
    )));

    while ticks.next().await.is_some() {
        for tournament in &tournaments {
            let result =
                cmd_tournament(services.clone(), tournament, false, true, None).await;
            if let Err(e) = result {
                match e.downcast_ref::<Error>() {
                    Some(credit @ Error::CreditExhausted { .. }) => {
                        wait_for_credit_reset(credit).await;
                    }
                    _ => eprintln!("Tournament {tournament} pass failed: {e}"),
                }
            }
        }
        println!("Pass complete; next run in {interval} minutes.");
    }

    Ok(())
}

async fn cmd_backfill_comments(services: Arc<Services>, dry_run: bool) -> Result<()> {
    let mut posted = 0usize;
    let mut candidates = 0usize;

    for post_id in services.store.known_posts()? {
        let records = services.store.load_past(post_id)?;
        let paths = services.store.record_paths(post_id)?;

        for (record, path) in records.iter().zip(paths.iter()) {
            if record.submitted_at.is_none() || record.comment_posted_at.is_some() {
                continue;
            }
            candidates += 1;
            println!(
                "Post {post_id} ({}): submitted {} without comment",
                record.question_title,
                record.submitted_at.as_deref().unwrap_or("?")
            );
            if dry_run {
                continue;
            }

            let output = saved_to_output(record, post_id);
            let text = format_reasoning_comment(&output);
            match post_comment(&services.settings, post_id, &text, true, true).await {
                Ok(()) => {
                    services.store.mark_comment_posted(path)?;
                    posted += 1;
                }
                Err(e) => eprintln!("Comment failed for post {post_id}: {e}"),
            }
        }
    }

    if candidates == 0 {
        println!("No forecasts need comments.");
    } else if !dry_run {
        println!("Posted {posted}/{candidates} comments.");
    }
    Ok(())
}
