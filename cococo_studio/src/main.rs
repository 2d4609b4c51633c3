// Cococo harmonizer — CLI entry point.
//
// Loads a score of note records, masks part of it, fills the masked cells
// with Coconet and writes the chosen result back out as note records.
// The pipeline: config → checkpoint → score + masks → generation → output.
//
// Usage:
//   cargo run -p cococo_studio --bin harmonize -- <notes.json> [output.json]
//     [--config PATH] [--checkpoint DIR] [--voices satb] [--from STEP]
//     [--to STEP] [--candidates N] [--pick N] [--seed N] [--temperature T]
//     [--key NAME] [--mode major|minor] [--mood happy|sad]
//
// `--voices` lists the voices to regenerate by initial (default "atb", the
// parts under a melody). `--from`/`--to` bound the masked steps. Logging is
// controlled by RUST_LOG.

use cococo_score::{Key, NoteRecord, Voice};
use cococo_studio::{GenerationStatus, Mood, Studio, StudioConfig};
use std::fmt::Display;
use std::path::{Path, PathBuf};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn main() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let args: Vec<String> = std::env::args().collect();
    let positional: Vec<&str> = positional_args(&args);
    let Some(input_path) = positional.first().copied() else {
        eprintln!("Usage: harmonize <notes.json> [output.json] [--checkpoint DIR] [options]");
        std::process::exit(2);
    };
    let output_path = positional.get(1).copied().unwrap_or("harmonized.json");

    println!("=== Cococo Harmonizer ===");

    // Config
    println!("[1/5] Loading config...");
    let mut config = match parse_flag::<PathBuf>(&args, "--config") {
        Some(path) => StudioConfig::load(&path).unwrap_or_else(|e| fail("loading config", e)),
        None => StudioConfig::default(),
    };
    if let Some(dir) = parse_flag::<PathBuf>(&args, "--checkpoint") {
        config.checkpoint_dir = Some(dir);
    }
    if let Some(seed) = parse_flag(&args, "--seed") {
        config.seed = Some(seed);
    }
    if let Some(n) = parse_flag(&args, "--candidates") {
        config.generation.num_candidates = n;
    }
    if let Some(t) = parse_flag(&args, "--temperature") {
        config.generation.temperature = t;
    }
    if let Some(mood) = parse_flag::<String>(&args, "--mood") {
        config.generation.mood = Some(parse_mood(&mood));
    }
    println!(
        "  {} bars, pitches {}..={}, {} candidate(s), temperature {}",
        config.layout.total_bars,
        config.layout.min_pitch,
        config.layout.max_pitch,
        config.generation.num_candidates,
        config.generation.temperature
    );
    if let Some(s) = config.seed {
        println!("  Seed: {}", s);
    }

    let mut studio = Studio::new(config);

    // Model
    println!("[2/5] Loading checkpoint...");
    match studio.config().checkpoint_dir.clone() {
        Some(dir) => {
            studio
                .load_configured_model()
                .unwrap_or_else(|e| fail(&format!("loading {}", dir.display()), e));
            println!("  Loaded {}", dir.display());
        }
        None => fail("loading checkpoint", "no --checkpoint given and none in config"),
    }

    // Score and masks
    println!("[3/5] Loading {}...", input_path);
    let records = read_records(Path::new(input_path));
    let skipped = studio
        .load_records(&records)
        .unwrap_or_else(|e| fail("loading notes", e));
    for e in &skipped {
        println!("  Skipped note: {}", e);
    }
    if studio.editor().is_empty() {
        fail("loading notes", format!("no usable notes in {}", input_path));
    }
    let key_name = parse_flag::<String>(&args, "--key").unwrap_or_else(|| "C".to_string());
    let mode_name = parse_flag::<String>(&args, "--mode").unwrap_or_else(|| "major".to_string());
    match Key::parse(&key_name, &mode_name) {
        Ok(key) => studio.set_key(key),
        Err(e) => eprintln!("  {}. Using C major.", e),
    }

    let total_steps = studio.editor().total_steps();
    let from: usize = parse_flag(&args, "--from").unwrap_or(0);
    let to: usize = parse_flag::<usize>(&args, "--to")
        .unwrap_or(total_steps)
        .min(total_steps);
    let voices = parse_voices(&parse_flag::<String>(&args, "--voices").unwrap_or_else(|| "atb".to_string()));
    for &voice in &voices {
        if let Err(e) = studio.add_mask(voice, from..to) {
            fail("masking", e);
        }
    }
    println!(
        "  {} notes, key {}, masking {:?} over steps {}..{}",
        studio.editor().len(),
        studio.editor().key().name(),
        voices,
        from,
        to
    );
    print!("{}", studio.summary());

    // Generation
    println!("[4/5] Generating...");
    if let Err(e) = studio.begin_generation() {
        fail("starting generation", e);
    }
    let mut current = None;
    let candidates = loop {
        match studio.step_generation() {
            Ok(GenerationStatus::Running {
                candidate,
                num_candidates,
                progress,
            }) => {
                if current != Some(candidate) {
                    println!(
                        "  Candidate {}/{}: {} Gibbs iterations",
                        candidate + 1,
                        num_candidates,
                        progress.num_iterations
                    );
                    current = Some(candidate);
                }
            }
            Ok(GenerationStatus::Finished(candidates)) => break candidates,
            Ok(GenerationStatus::Idle) => fail("generating", "generation stopped unexpectedly"),
            Err(e) => fail("generating", e),
        }
    };
    for (i, output) in candidates.outputs().iter().enumerate() {
        println!("  Candidate {}: {} notes", i + 1, output.len());
    }

    let pick: usize = parse_flag(&args, "--pick").unwrap_or(candidates.selected_index());
    if let Err(e) = studio.select_candidate(pick) {
        fail("selecting candidate", e);
    }
    if let Err(e) = studio.commit_candidate() {
        fail("committing candidate", e);
    }
    print!("{}", studio.summary());

    // Output
    println!("[5/5] Writing {}...", output_path);
    let json = serde_json::to_string_pretty(&studio.to_records()).unwrap_or_else(|e| fail("encoding notes", e));
    if let Err(e) = std::fs::write(output_path, json) {
        fail("writing output", e);
    }
    println!("  Done! {} notes.", studio.editor().len());
}

fn read_records(path: &Path) -> Vec<NoteRecord> {
    let data = std::fs::read_to_string(path).unwrap_or_else(|e| fail(&format!("reading {}", path.display()), e));
    serde_json::from_str(&data).unwrap_or_else(|e| fail(&format!("parsing {}", path.display()), e))
}

fn parse_voices(spec: &str) -> Vec<Voice> {
    let mut voices = Vec::new();
    for c in spec.to_lowercase().chars() {
        let voice = match c {
            's' => Voice::Soprano,
            'a' => Voice::Alto,
            't' => Voice::Tenor,
            'b' => Voice::Bass,
            _ => {
                eprintln!("Unknown voice '{}'. Skipping.", c);
                continue;
            }
        };
        if !voices.contains(&voice) {
            voices.push(voice);
        }
    }
    voices
}

fn parse_mood(name: &str) -> Mood {
    match name.to_lowercase().as_str() {
        "happy" => Mood::Happy,
        "sad" => Mood::Sad,
        _ => {
            eprintln!("Unknown mood '{}'. Using happy.", name);
            Mood::Happy
        }
    }
}

fn fail(context: &str, err: impl Display) -> ! {
    eprintln!("  Error {}: {}", context, err);
    std::process::exit(1);
}

/// Arguments that are neither flags nor flag values.
fn positional_args(args: &[String]) -> Vec<&str> {
    let mut out = Vec::new();
    let mut iter = args.iter().skip(1);
    while let Some(arg) = iter.next() {
        if arg.starts_with("--") {
            iter.next();
        } else {
            out.push(arg.as_str());
        }
    }
    out
}

fn parse_flag<T: std::str::FromStr>(args: &[String], flag: &str) -> Option<T> {
    args.iter().position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .and_then(|v| v.parse().ok())
}
