use anyhow::{bail, Context, Result};
use env_logger::Env;
use log::info;
use std::env;
use std::fs;

use z64_relocator::{RelocatorConfig, Relocator, VERSION};

const USAGE: &str = "Usage: z64-relocator <input> <output> [--config path] [--revision name] \
[--revisions path] [--dump path] [--no-move-vrom] [--no-move-rom] [--log-unaccounted]";

/// Options de la ligne de commande
#[derive(Debug, Default)]
struct Options {
    input: String,
    output: String,
    config: Option<String>,
    revision: Option<String>,
    revisions: Option<String>,
    dump: Option<String>,
    no_move_vrom: bool,
    no_move_rom: bool,
    log_unaccounted: bool,
}

fn parse_args(args: &[String]) -> Result<Options> {
    let mut options = Options::default();
    let mut positional = Vec::new();

    let mut i = 1;
    while i < args.len() {
        let arg = args[i].as_str();
        match arg {
            "--config" | "--revision" | "--revisions" | "--dump" => {
                let Some(value) = args.get(i + 1).cloned() else {
                    bail!("{} expects a value\n{}", arg, USAGE);
                };
                match arg {
                    "--config" => options.config = Some(value),
                    "--revision" => options.revision = Some(value),
                    "--revisions" => options.revisions = Some(value),
                    _ => options.dump = Some(value),
                }
                i += 1;
            }
            "--no-move-vrom" => options.no_move_vrom = true,
            "--no-move-rom" => options.no_move_rom = true,
            "--log-unaccounted" => options.log_unaccounted = true,
            _ if arg.starts_with("--") => bail!("unknown option {}\n{}", arg, USAGE),
            _ => positional.push(args[i].clone()),
        }
        i += 1;
    }

    match positional.as_slice() {
        [input, output] => {
            options.input = input.clone();
            options.output = output.clone();
        }
        _ => bail!("{}", USAGE),
    }
    Ok(options)
}

fn main() -> Result<()> {
    // Initialiser le logging
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();
    info!("z64-relocator {}", VERSION);

    let args: Vec<String> = env::args().collect();
    let options = parse_args(&args)?;

    let mut config = match &options.config {
        Some(path) => RelocatorConfig::load_from_file(path)?,
        None => RelocatorConfig::default(),
    };
    if let Some(revision) = &options.revision {
        config.revision = revision.clone();
    }
    if options.no_move_vrom {
        config.realloc.move_vrom = false;
    }
    if options.no_move_rom {
        config.realloc.move_rom = false;
    }
    if options.log_unaccounted {
        config.output.log_unaccounted = true;
    }
    if options.dump.is_some() {
        config.output.dump_tables = true;
    }

    let mut relocator = Relocator::new(config);
    if let Some(path) = &options.revisions {
        relocator.database_mut().load_from_file(path)?;
    }

    let data = fs::read(&options.input).with_context(|| format!("reading {}", options.input))?;
    let output = relocator
        .run(&data)
        .with_context(|| format!("relocating {}", options.input))?;

    // rien n'est écrit si le passage échoue
    fs::write(&options.output, &output.image)
        .with_context(|| format!("writing {}", options.output))?;
    info!("Wrote {} ({} bytes)", options.output, output.image.len());

    if let (Some(path), Some(dump)) = (&options.dump, &output.dump) {
        let json = serde_json::to_string_pretty(dump)?;
        fs::write(path, json).with_context(|| format!("writing {}", path))?;
        info!("Wrote table dump to {}", path);
    }

    Ok(())
}
