//! sessionscribe binary entry point

mod cli;

use clap::Parser;
use cli::{Cli, Commands};
use sessionscribe::audio::preprocess::{preprocess, PreprocessRequest};
use sessionscribe::bundle::vtt::write_vtt;
use sessionscribe::bundle::{read_bundle, write_bundle};
use sessionscribe::chunker::{chunk_audio, read_manifest};
use sessionscribe::config::{self, Config};
use sessionscribe::normalize::{normalize_file, InputFormat, NormalizeOptions};
use sessionscribe::session::{write_speaker_stub, SessionPaths};
use sessionscribe::speaker::assign::{assign, write_outputs, AssignParams};
use sessionscribe::speaker::{train_model, SpeakerModelBundle};
use sessionscribe::sync::{synchronize, write_method_artifacts};
use sessionscribe::transcribe::pool::{merge_transcripts, transcribe_chunks, PoolOptions};
use sessionscribe::transcribe::{create_provider, ResponseFormat};
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.quiet {
        "error"
    } else {
        match cli.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(format!("sessionscribe={},warn", log_level))),
        )
        .with_target(false)
        .init();

    let config = config::load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Preprocess {
            input,
            output,
            profile,
            sample_rate,
            channels,
            bit_depth,
            format,
            overwrite,
            filters,
        } => {
            let profile = profile
                .as_deref()
                .unwrap_or(&config.audio.profile)
                .parse()?;
            let mut req = PreprocessRequest::new(input, output, profile);
            req.sample_rate = sample_rate.unwrap_or(config.audio.sample_rate);
            req.channels = channels.unwrap_or(config.audio.channels);
            req.bit_depth = bit_depth.unwrap_or(config.audio.bit_depth);
            req.output_format = format
                .as_deref()
                .unwrap_or(&config.audio.output_format)
                .parse()?;
            req.overwrite = overwrite;
            req.filter_overrides = filters;
            req.target_dbfs = config.audio.target_dbfs;

            let out = preprocess(&req)?;
            info!("Preprocessed audio written to {}", out.display());
        }

        Commands::Chunk {
            input,
            out_dir,
            max_chunk_ms,
            min_silence_ms,
            silence_threshold,
        } => {
            let mut params = config.chunker.to_params(&config.audio);
            if let Some(v) = max_chunk_ms {
                params.max_chunk_ms = v;
            }
            if let Some(v) = min_silence_ms {
                params.min_silence_ms = v;
            }
            if let Some(v) = silence_threshold {
                params.silence_threshold_dbfs = v;
            }

            let chunks = chunk_audio(&input, &out_dir, &params)?;
            info!(
                "Wrote {} chunks to {} (manifest: chunk_manifest.json)",
                chunks.len(),
                out_dir.display()
            );
        }

        Commands::Transcribe {
            chunk_dir,
            out_dir,
            model,
            response_format,
            max_workers,
        } => {
            let mut stt = config.stt.clone();
            if let Some(m) = model {
                stt.model = m;
            }
            if let Some(f) = response_format {
                stt.response_format = f;
            }
            if max_workers.is_some() {
                stt.max_workers = max_workers;
            }

            let format: ResponseFormat = stt.response_format.parse()?;
            let chunks = read_manifest(&chunk_dir)?;
            let provider = create_provider(&stt)?;
            let opts = PoolOptions {
                max_workers: stt.max_workers,
                max_retries: stt.max_retries,
                backoff_base: Duration::from_secs(1),
                response_format: format,
            };

            let manifest = transcribe_chunks(provider, &chunks, &out_dir, &opts).await?;
            info!(
                "Transcribed {} chunks with {}",
                manifest.chunks.len(),
                manifest.model
            );

            if format == ResponseFormat::VerboseJson {
                let merged = merge_transcripts(&manifest)?;
                let path = out_dir.join("transcript.json");
                std::fs::write(&path, serde_json::to_string_pretty(&merged)?)?;
                info!("Merged transcript written to {}", path.display());
            } else {
                info!("Per-chunk VTT transcripts left in {}", out_dir.display());
            }
        }

        Commands::Normalize {
            input,
            output,
            format,
            diarization,
            offsets,
            audio,
            offset,
            source_id,
            word_gap,
        } => {
            let format: InputFormat = format.parse()?;
            let opts = NormalizeOptions {
                word_gap_seconds: word_gap,
                diarization,
                offsets_file: offsets,
                audio_path: audio,
                manual_offset: offset,
                source_id,
            };

            let bundle = normalize_file(&input, format, &opts)?;
            write_bundle(&bundle, &output)?;
            info!(
                "Normalized {} segments, {} speakers -> {}",
                bundle.segments.len(),
                bundle.speakers.len(),
                output.display()
            );
        }

        Commands::Sync {
            bundles,
            method,
            out_dir,
            session_id,
        } => {
            let mut sources = Vec::with_capacity(bundles.len());
            for path in &bundles {
                sources.push(read_bundle(path)?);
            }

            let synced = synchronize(&method, &sources)?;
            let session_id =
                session_id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
            let paths = SessionPaths::new(&out_dir, session_id);

            write_method_artifacts(&synced, &paths.method_dir(&method), &method)?;
            write_speaker_stub(&synced.bundle, &paths.speakers_blank(&method))?;
            write_bundle(&synced.bundle, &paths.normalized_bundle())?;

            info!(
                "Synchronized {} sources onto one timeline (start offset {:.3}s)",
                bundles.len(),
                synced.timeline_start
            );
            info!("Session artifacts under {}", paths.root.display());
        }

        Commands::Train {
            manifest,
            output,
            feature_type,
            seed,
            clip_split,
        } => {
            let mut speaker_config = config.speaker.clone();
            if let Some(ft) = feature_type {
                speaker_config.feature_type = ft;
            }
            let feature_params = speaker_config.feature_params()?;
            let mut training_params = speaker_config.training_params();
            if let Some(s) = seed {
                training_params.seed = s;
            }
            if clip_split {
                training_params.split_mode = "clip".to_string();
            }

            let bundle = train_model(&manifest, &feature_params, &training_params)?;
            if let Some(report) = &bundle.metrics {
                let mut names: Vec<&String> = report.splits.keys().collect();
                names.sort();
                for name in names {
                    let m = &report.splits[name];
                    info!(
                        "{} accuracy: {:.3} ({} clips)",
                        name, m.accuracy, m.size
                    );
                }
            }
            bundle.save(&output)?;
            info!(
                "Model for {} speakers saved to {}",
                bundle.labels.len(),
                output.display()
            );
        }

        Commands::Assign {
            diarization,
            audio,
            model,
            out_dir,
            min_segment,
            aggregation,
        } => {
            let model = SpeakerModelBundle::load(&model)?;
            let params = AssignParams {
                min_segment_seconds: min_segment
                    .unwrap_or(config.assign.min_segment_seconds),
                aggregation_seconds: aggregation
                    .unwrap_or(config.assign.aggregation_seconds),
            };

            let result = assign(&diarization, &audio, &model, &params)?;
            let stem = diarization
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or("diarization")
                .to_string();
            write_outputs(&result, &out_dir, &stem)?;
            info!(
                "Assigned speakers for {} segments -> {}",
                result.segments.len(),
                out_dir.display()
            );
        }

        Commands::ExportVtt { bundle, output } => {
            let bundle = read_bundle(&bundle)?;
            write_vtt(&bundle, &output)?;
            info!("WebVTT written to {}", output.display());
        }

        Commands::Config { write_default } => {
            if let Some(path) = write_default {
                config::write_default_config(&path)?;
                info!("Default config written to {}", path.display());
            } else {
                let path: Option<PathBuf> = cli.config.clone().or_else(Config::default_path);
                if let Some(path) = path {
                    println!("# config file: {}", path.display());
                }
                print!("{}", toml::to_string_pretty(&config)?);
            }
        }
    }

    Ok(())
}
