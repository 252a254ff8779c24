// Copyright 2025 AgentReplay (https://github.com/agentreplay)
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! ConvoEval CLI
//!
//! Runs the conversation relevancy demo and manages judge model settings.

mod cases;

use anyhow::{bail, Context, Result};
use clap::{ArgAction, Args, Parser, Subcommand};
use convoeval_core::{KeyFileHandler, KeyStore, KeyValues, KEY_FILE};
use convoeval_evals::{
    evaluate, ConversationRelevancyMetric, EvaluateOptions, GptModel, Metric,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[derive(Parser)]
#[command(name = "convoeval")]
#[command(about = "ConvoEval - LLM-as-judge conversation evaluation", long_about = None)]
struct Cli {
    /// Key file holding model settings
    #[arg(long, global = true, default_value = KEY_FILE, env = "CONVOEVAL_KEY_FILE")]
    key_file: PathBuf,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Evaluate test cases with the conversation relevancy metric (default)
    Run(RunArgs),

    /// Judge with an Azure OpenAI deployment
    SetAzureOpenai {
        /// Azure OpenAI endpoint
        #[arg(long)]
        endpoint: String,

        /// Azure OpenAI API key
        #[arg(long)]
        api_key: String,

        /// Deployment name
        #[arg(long)]
        deployment: String,

        /// API version, e.g. 2024-02-01
        #[arg(long)]
        api_version: String,

        /// Model version, shown alongside the deployment
        #[arg(long)]
        model_version: Option<String>,
    },

    /// Go back to judging with OpenAI
    UnsetAzureOpenai,
}

#[derive(Args)]
struct RunArgs {
    /// TOML file with test cases; the demo conversations are used otherwise
    #[arg(long)]
    cases: Option<PathBuf>,

    /// GPT model used as judge
    #[arg(long)]
    model: Option<String>,

    /// Minimum passing score
    #[arg(long, default_value_t = 0.5)]
    threshold: f64,

    /// Turns shown to the judge per verdict
    #[arg(long, default_value_t = 3)]
    window_size: usize,

    /// Require a perfect score
    #[arg(long)]
    strict: bool,

    /// Log verdicts alongside each result
    #[arg(long)]
    verbose: bool,

    /// Evaluate test cases concurrently
    #[arg(long, default_value_t = true, action = ArgAction::Set)]
    run_async: bool,

    /// Record metric errors instead of aborting
    #[arg(long, default_value_t = true, action = ArgAction::Set)]
    ignore_errors: bool,

    /// Cache metric results for the duration of the run
    #[arg(long)]
    use_cache: bool,
}

impl Default for RunArgs {
    fn default() -> Self {
        Self {
            cases: None,
            model: None,
            threshold: 0.5,
            window_size: 3,
            strict: false,
            verbose: false,
            run_async: true,
            ignore_errors: true,
            use_cache: false,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let keys = KeyFileHandler::new(&cli.key_file);

    match cli.command.unwrap_or_else(|| Commands::Run(RunArgs::default())) {
        Commands::Run(args) => run(args, Arc::new(keys)).await,
        Commands::SetAzureOpenai {
            endpoint,
            api_key,
            deployment,
            api_version,
            model_version,
        } => {
            keys.write_data(KeyValues::AzureOpenAIEndpoint, &endpoint)?;
            keys.write_data(KeyValues::AzureOpenAIApiKey, &api_key)?;
            keys.write_data(KeyValues::AzureDeploymentName, &deployment)?;
            keys.write_data(KeyValues::OpenAIApiVersion, &api_version)?;
            if let Some(version) = model_version {
                keys.write_data(KeyValues::AzureModelVersion, &version)?;
            }
            keys.write_data(KeyValues::UseAzureOpenAI, "YES")?;

            println!(
                "Azure OpenAI is now the judge model ({}).",
                keys.path().display()
            );
            Ok(())
        }
        Commands::UnsetAzureOpenai => {
            for key in KeyValues::azure() {
                keys.remove_data(key)?;
            }
            keys.write_data(KeyValues::UseAzureOpenAI, "NO")?;

            println!("Azure OpenAI unset; judging with OpenAI.");
            Ok(())
        }
    }
}

async fn run(args: RunArgs, keys: Arc<KeyFileHandler>) -> Result<()> {
    let test_cases = match &args.cases {
        Some(path) => cases::CasesFile::load(path)?.into_test_cases()?,
        None => cases::demo_cases()?,
    };

    let model = GptModel::new(args.model.as_deref(), keys).context("Failed to set up judge model")?;
    info!(model = %model.get_model_name(), "Judge model ready");

    let metric: Arc<dyn Metric> = Arc::new(
        ConversationRelevancyMetric::new(Arc::new(model))
            .with_threshold(args.threshold)
            .with_window_size(args.window_size)
            .with_strict_mode(args.strict)
            .with_verbose_mode(args.verbose),
    );

    let options = EvaluateOptions::default()
        .run_async(args.run_async)
        .ignore_errors(args.ignore_errors)
        .use_cache(args.use_cache);

    let results = evaluate(test_cases, vec![metric], options).await?;

    if args.verbose {
        for metric in results.test_results.iter().flat_map(|r| r.metrics_data.iter()) {
            if let Some(logs) = &metric.verbose_logs {
                println!("{}", logs);
            }
        }
    }

    println!("{}", results.summary);

    if !results.all_passed() {
        bail!(
            "{} of {} test cases failed",
            results.summary.failed,
            results.summary.total
        );
    }
    Ok(())
}
