use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use effect_forge::backend::Viewport;
use effect_forge::document::{load_document_from_path, save_document_to_path};
use effect_forge::{EngineConfig, FrameInputs, GraphicsBackend, HeadlessBackend, NagaGlslCompiler, Pipeline};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const USAGE: &str = "supported: --doc <effect.json>, --config <config.json>, --frames <n>, --size <WxH>, --save <out.json>, --png <out.png>, --no-sound";

#[derive(Debug, Clone, PartialEq)]
struct Cli {
    doc: Option<PathBuf>,
    config: Option<PathBuf>,
    frames: u32,
    size: Option<[u32; 2]>,
    save: Option<PathBuf>,
    png: Option<PathBuf>,
    no_sound: bool,
}

impl Default for Cli {
    fn default() -> Self {
        Self {
            doc: None,
            config: None,
            frames: 1,
            size: None,
            save: None,
            png: None,
            no_sound: false,
        }
    }
}

fn parse_size(text: &str) -> Result<[u32; 2]> {
    let (w, h) = text
        .split_once(['x', 'X'])
        .ok_or_else(|| anyhow!("invalid --size {text:?}, expected WxH"))?;
    let w: u32 = w.trim().parse().with_context(|| format!("invalid width in --size {text:?}"))?;
    let h: u32 = h.trim().parse().with_context(|| format!("invalid height in --size {text:?}"))?;
    if w == 0 || h == 0 {
        return Err(anyhow!("--size must be non-zero, got {text:?}"));
    }
    Ok([w, h])
}

fn parse_cli(args: &[String]) -> Result<Cli> {
    let mut cli = Cli::default();
    let mut i = 0;
    while i < args.len() {
        let flag = args[i].as_str();
        if flag == "--no-sound" {
            cli.no_sound = true;
            i += 1;
            continue;
        }
        let Some(v) = args.get(i + 1) else {
            return Err(anyhow!("missing value for {flag} ({USAGE})"));
        };
        match flag {
            "--doc" => cli.doc = Some(PathBuf::from(v)),
            "--config" => cli.config = Some(PathBuf::from(v)),
            "--frames" => {
                cli.frames = v
                    .parse()
                    .with_context(|| format!("invalid value for --frames: {v:?}"))?;
            }
            "--size" => cli.size = Some(parse_size(v)?),
            "--save" => cli.save = Some(PathBuf::from(v)),
            "--png" => cli.png = Some(PathBuf::from(v)),
            other => return Err(anyhow!("unknown argument: {other} ({USAGE})")),
        }
        i += 2;
    }
    if cli.doc.is_none() {
        return Err(anyhow!("--doc <effect.json> is required ({USAGE})"));
    }
    Ok(cli)
}

fn write_surface_png(pipeline: &mut Pipeline<HeadlessBackend>, path: &Path) -> Result<()> {
    let [w, h] = pipeline.resolution();
    let backend = pipeline.backend_mut();
    let target = backend.surface_target();
    let texels = backend.read_pixels(target, None, Viewport::full(w, h))?;
    let bytes: Vec<u8> = texels
        .iter()
        .flat_map(|t| t.map(|c| (c.clamp(0.0, 1.0) * 255.0).round() as u8))
        .collect();
    let img = image::RgbaImage::from_raw(w, h, bytes)
        .ok_or_else(|| anyhow!("surface readback has the wrong size for {w}x{h}"))?;
    img.save(path)
        .with_context(|| format!("failed to write png to {}", path.display()))
}

fn run(cli: Cli) -> Result<()> {
    let mut config = match cli.config.as_deref() {
        Some(path) => EngineConfig::load_from_path(path)?,
        None => EngineConfig::default(),
    };
    if let Some(size) = cli.size {
        config.initial_resolution = size;
    }
    if cli.no_sound {
        config.sound_enabled = false;
    }

    let doc_path = cli.doc.as_deref().ok_or_else(|| anyhow!("--doc is required"))?;
    let doc = load_document_from_path(doc_path)?;

    let compiler = Arc::new(NagaGlslCompiler::new());
    let mut pipeline = Pipeline::new(HeadlessBackend::new(), compiler, config)?;
    pipeline
        .load(&doc)
        .with_context(|| format!("failed to load {}", doc_path.display()))?;
    if !pipeline.check_correctness() {
        for violation in pipeline.structure_violations() {
            warn!("[load] {violation}");
        }
    }

    pipeline.compile_all(false, |report| {
        info!(
            success = report.success,
            elapsed_ms = report.elapsed.as_millis() as u64,
            "[compile] done"
        );
    });
    pipeline.wait_for_compiles();

    let frame_rate = 60.0;
    for frame in 0..cli.frames {
        let inputs = FrameInputs {
            time: frame as f32 / frame_rate,
            time_delta: if frame == 0 { 0.0 } else { 1.0 / frame_rate },
            frame_rate,
            ..FrameInputs::default()
        };
        if let Err(e) = pipeline.paint_frame(&inputs) {
            warn!(frame, "[frame] {e:#}");
        }
    }

    let passes: Vec<_> = pipeline
        .passes()
        .iter()
        .map(|p| {
            serde_json::json!({
                "name": p.name(),
                "type": p.pass_type().as_str(),
                "error": p.compile_error(),
                "log": p.compile_error_text(),
            })
        })
        .collect();
    let summary = serde_json::json!({
        "flags": pipeline.compute_flags(),
        "passes": passes,
        "frames": pipeline.frame_counter(),
        "compile_ms": pipeline.compilation_elapsed().as_millis() as u64,
    });
    println!("{}", serde_json::to_string_pretty(&summary)?);

    if let Some(path) = cli.save.as_deref() {
        save_document_to_path(&pipeline.save(), path)?;
        info!(path = %path.display(), "[save] wrote effect document");
    }
    if let Some(path) = cli.png.as_deref() {
        write_surface_png(&mut pipeline, path)?;
        info!(path = %path.display(), "[save] wrote surface png");
    }
    Ok(())
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let argv: Vec<String> = std::env::args().skip(1).collect();
    let cli = parse_cli(&argv)?;
    run(cli)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn parses_all_flags() {
        let cli = parse_cli(&args(&[
            "--doc", "a.json", "--frames", "3", "--size", "64x32", "--no-sound", "--png", "out.png",
        ]))
        .unwrap();
        assert_eq!(cli.doc, Some(PathBuf::from("a.json")));
        assert_eq!(cli.frames, 3);
        assert_eq!(cli.size, Some([64, 32]));
        assert!(cli.no_sound);
        assert_eq!(cli.png, Some(PathBuf::from("out.png")));
        assert!(cli.save.is_none());
    }

    #[test]
    fn rejects_missing_doc_and_bad_values() {
        assert!(parse_cli(&args(&["--frames", "2"])).is_err());
        assert!(parse_cli(&args(&["--doc", "a.json", "--size", "0x4"])).is_err());
        assert!(parse_cli(&args(&["--doc", "a.json", "--frames"])).is_err());
        assert!(parse_cli(&args(&["--doc", "a.json", "--bogus", "1"])).is_err());
    }
}
