//! `generate`: submit a job and follow it to the end.

use std::collections::BTreeMap;

use anyhow::{Context, Result, bail};

use atelier_client::Session;
use atelier_core::config::AtelierConfig;
use atelier_core::params::{ConfigValue, normalize_selected_configs};
use atelier_core::{GenerationParams, TaskType};
use atelier_services::{GenerateError, Phase};

use super::render::banner;

/// Parsed `generate` arguments.
#[derive(Debug)]
pub struct GenerateArgs {
    pub params: GenerationParams,
    /// Track by polling only; leave the push channel closed.
    pub no_push: bool,
}

impl GenerateArgs {
    /// `generate <tryon|model|detail> [--prompt P] [--user-prompt P]
    /// [--image URL]... [--aspect R] [--resolution R] [--option K=V]... [--no-push]`
    pub fn parse(args: &[&str]) -> Result<Self> {
        let (kind, rest) = args.split_first().context("generate needs a task type")?;
        let task_type =
            TaskType::parse(kind).with_context(|| format!("unknown task type: {kind}"))?;

        let mut params = GenerationParams::new(task_type);
        let mut options: BTreeMap<String, Vec<String>> = BTreeMap::new();
        let mut no_push = false;

        let mut i = 0;
        while i < rest.len() {
            let flag = rest[i];
            let mut value = || {
                i += 1;
                rest.get(i)
                    .map(|v| v.to_string())
                    .with_context(|| format!("{flag} requires a value"))
            };
            match flag {
                "--prompt" => params.prompt = Some(value()?),
                "--user-prompt" => params.user_prompt = Some(value()?),
                "--image" => params.reference_images.push(value()?),
                "--aspect" => params.aspect_ratio = value()?,
                "--resolution" => params.resolution = value()?,
                "--option" => {
                    let pair = value()?;
                    let (key, val) = pair
                        .split_once('=')
                        .with_context(|| format!("--option expects KEY=VALUE, got {pair}"))?;
                    options.entry(key.to_string()).or_default().push(val.to_string());
                }
                "--no-push" => no_push = true,
                other => bail!("unknown generate option: {other}"),
            }
            i += 1;
        }

        params.selected_configs = normalize_selected_configs(
            options
                .into_iter()
                .map(|(key, mut values)| (key, Some(option_value(&mut values)))),
        );
        Ok(Self { params, no_push })
    }
}

fn option_value(values: &mut Vec<String>) -> ConfigValue {
    if values.len() > 1 {
        return ConfigValue::Many(std::mem::take(values));
    }
    let one = values.pop().unwrap_or_default();
    match one.as_str() {
        "true" => ConfigValue::Flag(true),
        "false" => ConfigValue::Flag(false),
        _ => ConfigValue::One(one),
    }
}

pub async fn cmd_generate(config: &AtelierConfig, args: GenerateArgs) -> Result<()> {
    args.params.validate()?;

    let session = Session::new(config)?;
    if !args.no_push {
        session.start().await;
    }

    let mut progress = session.orchestrator.watch();
    let reporter = tokio::spawn(async move {
        let mut last_channel = None;
        while progress.changed().await.is_ok() {
            let state = progress.borrow_and_update().clone();
            if state.channel != last_channel {
                if let (Some(task_id), Some(channel)) = (&state.task_id, state.channel) {
                    eprintln!("  task {task_id} tracked via {channel}");
                }
                last_channel = state.channel;
            }
        }
    });

    let outcome = tokio::select! {
        outcome = session.orchestrator.generate(args.params) => outcome,
        _ = tokio::signal::ctrl_c() => Err(GenerateError::Cancelled),
    };
    reporter.abort();
    session.socket.disconnect();

    let state = outcome?;
    match state.phase {
        Phase::Succeeded => {
            banner("Generation succeeded");
            if let Some(task_id) = &state.task_id {
                println!("  Task   : {task_id}");
            }
            match &state.result_url {
                Some(url) => println!("  Image  : {url}"),
                None => println!("  Image  : (none returned)"),
            }
            Ok(())
        }
        Phase::Failed => {
            banner("Generation failed");
            if let Some(task_id) = &state.task_id {
                println!("  Task   : {task_id}");
            }
            println!("  Error  : {}", state.error.as_deref().unwrap_or("-"));
            std::process::exit(2);
        }
        other => bail!("generation ended in unexpected phase {other}"),
    }
}
