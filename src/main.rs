use anyhow::{anyhow, Result};
use serde_json::json;
use std::path::PathBuf;
use tracing::{error, info};

use facecascade::config::Config;
use facecascade::faces::onnx::load_cascade;
use facecascade::faces::Face;
use facecascade::logging;

struct Args {
    config_path: Option<PathBuf>,
    images: Vec<PathBuf>,
}

fn parse_args() -> Args {
    let args: Vec<String> = std::env::args().collect();
    let mut config_path = None;
    let mut images = Vec::new();

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--help" | "-h" => {
                print_help();
                std::process::exit(0);
            }
            "--version" | "-V" => {
                println!("facecascade {}", env!("CARGO_PKG_VERSION"));
                std::process::exit(0);
            }
            "--config" | "-c" => {
                if i + 1 < args.len() {
                    config_path = Some(PathBuf::from(&args[i + 1]));
                    i += 1;
                } else {
                    eprintln!("Error: --config requires a path argument");
                    std::process::exit(1);
                }
            }
            arg if arg.starts_with('-') => {
                eprintln!("Unknown argument: {}", arg);
                print_help();
                std::process::exit(1);
            }
            path => images.push(PathBuf::from(path)),
        }
        i += 1;
    }

    if images.is_empty() {
        print_help();
        std::process::exit(1);
    }

    Args { config_path, images }
}

fn print_help() {
    println!(
        r#"facecascade - cascaded face and landmark detection

USAGE:
    facecascade [OPTIONS] IMAGE...

OPTIONS:
    --config, -c PATH   Path to config file
    --version, -V       Show version
    --help, -h          Show this help message

ENVIRONMENT:
    FACECASCADE_LOG     Log level (trace, debug, info, warn, error)

Config file location: $XDG_CONFIG_HOME/facecascade/config.toml
Prints one JSON object per image to stdout."#
    );
}

fn face_json(face: &Face) -> serde_json::Value {
    json!({
        "box": face.bounding_box(),
        "confidence": face.confidence(),
        "landmarks": face.image_points(),
    })
}

fn main() -> Result<()> {
    let args = parse_args();

    if let Err(e) = logging::init(Some(Config::config_dir().join("logs"))) {
        eprintln!("Warning: logging disabled: {:#}", e);
    }

    let config = match args.config_path {
        Some(path) => Config::load_from(&path)?,
        None => Config::load()?,
    };

    let mut cascade = load_cascade(&config)?;
    info!(images = args.images.len(), "Models loaded");

    let mut failures = 0;
    for path in &args.images {
        match cascade.detect_path(path) {
            Ok(faces) => {
                let line = json!({
                    "path": path.display().to_string(),
                    "faces": faces.iter().map(face_json).collect::<Vec<_>>(),
                });
                println!("{}", line);
            }
            Err(e) => {
                error!(path = %path.display(), error = %e, "Detection failed");
                eprintln!("Error processing {}: {}", path.display(), e);
                failures += 1;
            }
        }
    }

    if failures > 0 {
        return Err(anyhow!("{} of {} images failed", failures, args.images.len()));
    }
    Ok(())
}
