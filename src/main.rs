use crate::client::DownloadClient;
use crate::config::{Args, Conf, Job};
use crate::prompt::Answers;
use clap::Parser;
use prelude::*;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

pub mod client;
pub mod config;
pub mod errors;
pub mod prelude;
pub mod prompt;
#[cfg(test)]
mod test_support;

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    init_logging(args.verbose);

    match run(args).await {
        Ok(output) => {
            println!(
                "\nVideo saved as {} and temporary files cleaned up.",
                output.display()
            );
            ExitCode::SUCCESS
        }
        Err(err) => {
            debug!("run failed: {:?}", err);
            eprintln!("Error: {:#}", anyhow::Error::from(err));
            ExitCode::FAILURE
        }
    }
}

fn init_logging(verbose: u8) {
    let default_filter = match verbose {
        0 => "ft_video=info,reqwest=warn,hyper=warn",
        1 => "ft_video=debug,reqwest=info,hyper=warn",
        _ => "ft_video=trace,reqwest=debug,hyper=info",
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn run(args: Args) -> Result<PathBuf> {
    let conf = Conf::load(&args)?;
    let job = job_from_args(&args)?;
    info!("Downloading {} into {:?}", job.playlist_url, job.output);

    let client = DownloadClient::new(conf)?;
    client.run(&job).await
}

/// Builds the job from the command line, asking for the inputs when no URL was given.
fn job_from_args(args: &Args) -> Result<Job> {
    let answers = Answers {
        url: args.m3u8_url.clone(),
        output: args.output_file.clone(),
        start: args.start.clone(),
        end: args.end.clone(),
    };
    let answers = if args.interactive || answers.url.is_none() {
        let mut input = std::io::stdin().lock();
        let mut output = std::io::stdout();
        prompt::ask_inputs(&mut input, &mut output, answers)?
    } else {
        answers
    };

    Job::new(
        answers.url.as_deref().unwrap_or_default(),
        answers.output.as_deref(),
        answers.start.as_deref(),
        answers.end.as_deref(),
    )
}
