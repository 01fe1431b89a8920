use std::future::Future;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use nesupixel_comfyui::PreviewFrame;
use nesupixel_core::config::ComfyConfig;
use nesupixel_core::lora::LoraCatalog;
use nesupixel_core::translate::TranslatorConfig;
use nesupixel_pipeline::{
    GenerationOutcome, Generator, InpaintRequest, PipelineError, RunOptions, Txt2ImgRequest,
};
use tokio::sync::mpsc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// NESUPixel - generate images with a ComfyUI server
#[derive(Parser, Debug)]
#[command(name = "nesupixel")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Print the generation outcome as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Generate an image from a text prompt
    Txt2img(Txt2ImgArgs),
    /// Repaint the masked part of an image
    Inpaint(InpaintArgs),
    /// Stop whatever ComfyUI is executing
    Interrupt,
    /// List LoRA preset aliases
    Loras,
}

#[derive(Args, Debug)]
struct PromptArgs {
    #[arg(long)]
    prompt: String,

    /// Defaults to the built-in negative prompt
    #[arg(long)]
    negative: Option<String>,

    /// Negative picks a random seed
    #[arg(long, allow_negative_numbers = true)]
    seed: Option<i64>,

    /// LoRA preset alias or filename
    #[arg(long)]
    lora: Option<String>,

    #[arg(long)]
    lora_strength: Option<f64>,

    /// Translate prompts before submitting
    #[arg(long)]
    translate: bool,

    /// Override TRACK_TIMEOUT_SECS for this run
    #[arg(long)]
    timeout_secs: Option<u64>,
}

#[derive(Args, Debug)]
struct Txt2ImgArgs {
    #[command(flatten)]
    prompt: PromptArgs,

    #[arg(long)]
    width: Option<u32>,

    #[arg(long)]
    height: Option<u32>,
}

#[derive(Args, Debug)]
struct InpaintArgs {
    #[command(flatten)]
    prompt: PromptArgs,

    /// Image to repaint
    #[arg(long)]
    image: PathBuf,

    /// Layer with the painted strokes (RGBA uses alpha, otherwise luma)
    #[arg(long)]
    mask_layer: Option<PathBuf>,

    #[arg(long)]
    invert_mask: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "nesupixel_cli=info,nesupixel_pipeline=info,nesupixel_comfyui=info".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    let config = ComfyConfig::from_env().context("invalid configuration")?;
    let loras = LoraCatalog::load_or_empty(&config.lora_presets_path);
    let translator = TranslatorConfig::from_env().build();
    tracing::info!(
        api_url = %config.api_url,
        ws_url = %config.ws_url,
        lora_presets = loras.len(),
        "NESUPixel starting",
    );
    let generator = Generator::new(config, loras, translator);

    match cli.command {
        Command::Interrupt => {
            generator.interrupt().await.context("interrupt failed")?;
            println!("Interrupt sent");
        }
        Command::Loras => {
            for alias in generator.loras().aliases() {
                println!("{alias}");
            }
        }
        Command::Txt2img(args) => {
            let deadline = args.prompt.timeout_secs.map(Duration::from_secs);
            let request = Txt2ImgRequest {
                prompt: args.prompt.prompt,
                negative: args.prompt.negative,
                width: args.width,
                height: args.height,
                seed: args.prompt.seed,
                lora: args.prompt.lora,
                lora_strength: args.prompt.lora_strength,
                translate: args.prompt.translate,
            };
            let outcome = with_previews(&generator, deadline, |options| {
                generator.txt2img(&request, options)
            })
            .await?;
            report(&outcome, cli.json)?;
        }
        Command::Inpaint(args) => {
            let deadline = args.prompt.timeout_secs.map(Duration::from_secs);
            let request = InpaintRequest {
                prompt: args.prompt.prompt,
                negative: args.prompt.negative,
                image: args.image,
                mask_layer: args.mask_layer,
                invert_mask: args.invert_mask,
                seed: args.prompt.seed,
                lora: args.prompt.lora,
                lora_strength: args.prompt.lora_strength,
                translate: args.prompt.translate,
            };
            let outcome = with_previews(&generator, deadline, |options| {
                generator.inpaint(&request, options)
            })
            .await?;
            report(&outcome, cli.json)?;
        }
    }

    Ok(())
}

/// Run a generation while a separate task drains its preview frames.
async fn with_previews<F, Fut>(
    generator: &Generator,
    deadline: Option<Duration>,
    run: F,
) -> anyhow::Result<GenerationOutcome>
where
    F: FnOnce(RunOptions) -> Fut,
    Fut: Future<Output = Result<GenerationOutcome, PipelineError>>,
{
    let (sink, rx) = generator.preview_channel();
    let drain = tokio::spawn(drain_previews(rx));

    let outcome = run(RunOptions {
        preview: Some(sink),
        deadline,
    })
    .await;

    // The listener owned the sink, so the channel is closed by now.
    let previews = drain.await.unwrap_or_default();
    tracing::debug!(previews, "Preview stream finished");

    Ok(outcome?)
}

async fn drain_previews(mut rx: mpsc::Receiver<PreviewFrame>) -> usize {
    let mut count = 0;
    while let Some(frame) = rx.recv().await {
        count += 1;
        tracing::info!(
            n = count,
            width = frame.width,
            height = frame.height,
            format = ?frame.format,
            bytes = frame.bytes.len(),
            "Preview",
        );
    }
    count
}

fn report(outcome: &GenerationOutcome, json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(outcome)?);
    } else {
        println!("prompt_id: {}", outcome.prompt_id);
        println!("wait:      {:?}", outcome.tracking.wait_outcome);
        if let Some(artifact) = &outcome.artifact {
            println!("url:       {}", artifact.url);
            match &artifact.local_path {
                Some(path) => println!("file:      {}", path.display()),
                None => println!("file:      (not available locally)"),
            }
        }
    }

    if outcome.artifact.is_none() {
        anyhow::bail!(
            "no output image for prompt {} (unresolved nodes: {:?})",
            outcome.prompt_id,
            outcome.tracking.unresolved
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_txt2img_with_negative_seed() {
        let cli = Cli::try_parse_from([
            "nesupixel", "txt2img", "--prompt", "fox", "--seed", "-1", "--width", "768",
            "--lora", "pixel", "--timeout-secs", "30",
        ])
        .unwrap();

        let Command::Txt2img(args) = cli.command else {
            panic!("expected txt2img");
        };
        assert_eq!(args.prompt.prompt, "fox");
        assert_eq!(args.prompt.seed, Some(-1));
        assert_eq!(args.width, Some(768));
        assert_eq!(args.height, None);
        assert_eq!(args.prompt.lora.as_deref(), Some("pixel"));
        assert_eq!(args.prompt.timeout_secs, Some(30));
    }

    #[test]
    fn inpaint_requires_image() {
        assert!(Cli::try_parse_from(["nesupixel", "inpaint", "--prompt", "x"]).is_err());

        let cli = Cli::try_parse_from([
            "nesupixel", "--json", "inpaint", "--prompt", "x", "--image", "a.png",
            "--mask-layer", "m.png", "--invert-mask",
        ])
        .unwrap();
        assert!(cli.json);
        let Command::Inpaint(args) = cli.command else {
            panic!("expected inpaint");
        };
        assert_eq!(args.image, PathBuf::from("a.png"));
        assert!(args.invert_mask);
    }
}
