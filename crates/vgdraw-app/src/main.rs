//! Replay a touch script and write the document.

use std::path::PathBuf;
use std::process::ExitCode;

const USAGE: &str = "usage: vgdraw <script.json> [-o <out.vg>] [--record <dir>]";

#[derive(Debug, PartialEq, Eq)]
struct Args {
    script: PathBuf,
    output: PathBuf,
    record: Option<PathBuf>,
}

fn parse_args(mut args: impl Iterator<Item = String>) -> Result<Args, String> {
    let mut script = None;
    let mut output = None;
    let mut record = None;
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "-o" | "--output" => {
                output = Some(PathBuf::from(args.next().ok_or("missing value for --output")?));
            }
            "--record" => {
                record = Some(PathBuf::from(args.next().ok_or("missing value for --record")?));
            }
            "-h" | "--help" => return Err(USAGE.to_string()),
            _ if arg.starts_with('-') => return Err(format!("unknown option {arg}")),
            _ if script.is_none() => script = Some(PathBuf::from(arg)),
            _ => return Err(format!("unexpected argument {arg}")),
        }
    }
    let script = script.ok_or_else(|| USAGE.to_string())?;
    let output = output.unwrap_or_else(|| script.with_extension("vg"));
    Ok(Args {
        script,
        output,
        record,
    })
}

fn main() -> ExitCode {
    env_logger::init();

    let args = match parse_args(std::env::args().skip(1)) {
        Ok(args) => args,
        Err(message) => {
            eprintln!("{message}");
            return ExitCode::from(2);
        }
    };
    log::info!("replaying {}", args.script.display());

    match vgdraw_app::run_file(&args.script, &args.output, args.record.as_deref()) {
        Ok(summary) => {
            println!(
                "{} shapes, change {}, {}/{} events handled, {} frames",
                summary.shapes, summary.change_count, summary.handled, summary.events, summary.frames
            );
            ExitCode::SUCCESS
        }
        Err(e) => {
            log::error!("replay failed: {e}");
            eprintln!("vgdraw: {e}");
            ExitCode::FAILURE
        }
    }
}
