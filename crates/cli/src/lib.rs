pub mod commands;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand, ValueEnum};
use leadflow_core::flows::FlowTemplate;

#[derive(Debug, Parser)]
#[command(
    name = "leadflow",
    about = "Leadflow operator CLI",
    long_about = "Operate the chat engine: migrations, config inspection, readiness checks, demo data and training generation.",
    after_help = "Examples:\n  leadflow doctor --json\n  leadflow seed --template healthcare\n  leadflow train --input site.html --html --chatbot demo-chatbot"
)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum TemplateArg {
    General,
    Healthcare,
    Ecommerce,
}

impl From<TemplateArg> for FlowTemplate {
    fn from(value: TemplateArg) -> Self {
        match value {
            TemplateArg::General => Self::General,
            TemplateArg::Healthcare => Self::Healthcare,
            TemplateArg::Ecommerce => Self::Ecommerce,
        }
    }
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Apply pending database migrations and return structured status output")]
    Migrate,
    #[command(
        about = "Inspect effective configuration values with source attribution and redaction"
    )]
    Config,
    #[command(about = "Validate config, model provider readiness and DB connectivity")]
    Doctor {
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
    },
    #[command(about = "Insert or refresh the demo chatbot with a sample flow and training items")]
    Seed {
        #[arg(long, value_enum, default_value = "general", help = "Sample flow to attach")]
        template: TemplateArg,
    },
    #[command(about = "Generate training data from a business description or website")]
    Train {
        #[arg(
            long,
            required_unless_present = "url",
            conflicts_with = "url",
            help = "File holding the business text or page HTML"
        )]
        input: Option<PathBuf>,
        #[arg(long, requires = "input", help = "Treat the input as HTML and extract visible text first")]
        html: bool,
        #[arg(long, help = "Fetch the site and up to eight same-site pages it links to")]
        url: Option<String>,
        #[arg(long, help = "Store the result on this chatbot instead of only printing it")]
        chatbot: Option<String>,
    },
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Migrate => commands::migrate::run(),
        Command::Config => {
            commands::CommandResult { exit_code: 0, output: commands::config::run() }
        }
        Command::Doctor { json } => {
            commands::CommandResult { exit_code: 0, output: commands::doctor::run(json) }
        }
        Command::Seed { template } => commands::seed::run(template.into()),
        Command::Train { input, html, url, chatbot } => {
            let source = match url {
                Some(url) => commands::train::TrainSource::Website(url),
                None => commands::train::TrainSource::File { path: input.unwrap_or_default(), html },
            };
            commands::train::run(commands::train::TrainArgs { source, chatbot })
        }
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}
