mod cli;

use anyhow::Context;
use retab::diagnostics::Diagnostics;
use retab::engine::Evaluator;
use retab::schema::FileSchemaLoader;
use retab::source::BodyBuilder;
use retab::value::Value;
use std::path::Path;

fn main() {
    use clap::Parser;
    let cli = cli::Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_env("RETAB_LOG"))
        .with_writer(std::io::stderr)
        .init();

    for new_path in cli.directory.iter() {
        match new_path.canonicalize() {
            Err(e) => {
                eprintln!(
                    "Failed to resolve path for -C/--directory {}\n{}",
                    new_path.display(),
                    e
                );
                std::process::exit(1);
            }
            Ok(cwd) => {
                if let Err(err) = std::env::set_current_dir(&cwd) {
                    eprintln!("Failed to set work directory to {}\n{}", cwd.display(), err,);
                    std::process::exit(1);
                }

                tracing::info!(directory=%cwd.display(), "Changed working directory");
            }
        }
    }

    let command_result = match cli.command {
        cli::Command::Generate(gen_cli) => generate(gen_cli),
        cli::Command::Evaluate(eval_cli) => evaluate(eval_cli),
        cli::Command::Dev(dev_cli) => dev(dev_cli),
    };

    if let Err(e) = command_result {
        for error in e.chain() {
            eprintln!("{error}")
        }
        std::process::exit(1);
    }
}

pub fn generate(cli: cli::GenerateCommand) -> anyhow::Result<()> {
    let files = load(&cli.input)?;
    let workdir = std::env::current_dir()?;
    let env = retab::env::load_env(&workdir);

    let (results, diags) =
        retab::evaluate_with_loader(&files, &env, &FileSchemaLoader::new(&workdir));
    report(&diags);
    anyhow::ensure!(!diags.has_errors(), "evaluation failed, nothing was written");

    for result in &results {
        let contents = result
            .encode()
            .with_context(|| format!("unable to encode gen {}", result.name))?;

        if cli.dry_run {
            println!("--- {} ({})", result.path, result.name);
            println!("{}", String::from_utf8_lossy(&contents));
            continue;
        }

        let path = workdir.join(&result.path);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("unable to create directory {}", parent.display()))?;
        }
        std::fs::write(&path, contents)
            .with_context(|| format!("unable to write {}", path.display()))?;
        tracing::info!(path = %path.display(), name = %result.name, "wrote document");
    }

    Ok(())
}

pub fn evaluate(cli: cli::EvaluateCommand) -> anyhow::Result<()> {
    let files = load(&cli.input)?;
    let env = retab::env::load_env(&std::env::current_dir()?);
    let expr: hcl_edit::expr::Expression = cli.expression.parse()?;

    let mut evaluator = Evaluator::new(&files, &env);
    let diags = evaluator.run();
    report(&diags);

    let file = files
        .file_names()
        .next()
        .context("No files loaded")?
        .to_string();
    let value = evaluator.evaluate_in_context(&file, &expr).map_err(|diags| {
        report(&diags);
        anyhow::anyhow!("unable to evaluate expression")
    })?;

    output(&cli.output, &retab::encode::encode(&value))
}

fn report(diags: &Diagnostics) {
    for diagnostic in diags {
        eprintln!("{diagnostic}");
    }
}

fn load(input: &cli::InputArgs) -> anyhow::Result<BodyBuilder> {
    let mut files = BodyBuilder::default();

    if input.files.is_empty() && input.directories.is_empty() {
        files.load_directory(&std::env::current_dir()?)?;
    }

    for file_path in &input.files {
        files.load_file(file_path)?;
    }

    for dir_path in &input.directories {
        load_directory(&mut files, dir_path)?;
    }

    anyhow::ensure!(files.file_count() > 0, "No files loaded");

    Ok(files)
}

fn load_directory(files: &mut BodyBuilder, dir_path: &Path) -> anyhow::Result<()> {
    files
        .load_directory(dir_path)
        .with_context(|| format!("unable to load {}", dir_path.display()))
}

fn output(output: &cli::OutputArgs, value: &Value) -> anyhow::Result<()> {
    match output.format {
        cli::OutputFormat::Yaml => serde_yaml::to_writer(std::io::stdout(), value)?,
        cli::OutputFormat::Json => serde_json::to_writer_pretty(std::io::stdout(), value)?,
    };

    Ok(())
}

/// (retab-)developer utilities
///
/// A quick way to expose internal structures for debugging purposes
pub fn dev(cli: cli::DevCommand) -> anyhow::Result<()> {
    use cli::DevSubCommand::*;

    let files = load(&cli.input)?;

    match cli.command {
        Documents => println!("{files:#?}"),
        Tree => {
            let mut evaluator = Evaluator::new(&files, &Default::default());
            let diags = evaluator.run();
            report(&diags);
            println!("{:#?}", evaluator.tree());
        }
    }

    Ok(())
}
