use std::process::ExitCode;

use anyhow::Context as _;
use clap::Parser as _;

#[tokio::main]
async fn main() -> ExitCode {
    if let Err(err) = try_main().await {
        eprintln!("{err:#}");
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}

async fn try_main() -> anyhow::Result<()> {
    textbookify::logging::init().context("init logging")?;

    let cli = textbookify::cli::Cli::parse();
    tracing::debug!(?cli, "parsed cli");

    match cli.command {
        textbookify::cli::Command::Build(args) => {
            textbookify::build::run(args).await.context("build")?;
        }
        textbookify::cli::Command::Validate(args) => {
            textbookify::build::validate_request(args).context("validate")?;
        }
        textbookify::cli::Command::Plan(args) => {
            textbookify::build::plan_document(args).context("plan")?;
        }
        textbookify::cli::Command::Generate(args) => {
            textbookify::build::generate_document(args)
                .await
                .context("generate")?;
        }
        textbookify::cli::Command::Export(args) => {
            textbookify::build::export_document(args).context("export")?;
        }
        textbookify::cli::Command::Formats => {
            textbookify::build::print_formats().context("formats")?;
        }
    }

    Ok(())
}
