use std::path::{Path, PathBuf};

use anyhow::Context as _;
use clap::{Parser, Subcommand, ValueEnum};
use slidecast::compositor::{Compositor, Resources};
use slidecast::{AudioCodec, Codec, Container, EncodeOptions, ProjectConfig, Timeline};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "slidecast", version, about = "Render slideshow projects to video")]
struct Cli {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Render a project to a video file.
    Render(RenderArgs),
    /// Print the derived timeline of a project as JSON.
    Timeline(TimelineArgs),
    /// Render a single frame as a PNG.
    Frame(FrameArgs),
}

#[derive(Parser, Debug)]
struct RenderArgs {
    /// Project JSON.
    project: PathBuf,

    /// Output video path.
    #[arg(short, long)]
    out: PathBuf,

    #[arg(long, value_enum, default_value_t = ContainerChoice::Mkv)]
    container: ContainerChoice,

    #[arg(long, value_enum, default_value_t = CodecChoice::Av1)]
    codec: CodecChoice,

    #[arg(long, value_enum, default_value_t = AudioCodecChoice::Pcm)]
    audio_codec: AudioCodecChoice,

    /// Quality 0-100.
    #[arg(long, default_value_t = 60, value_parser = clap::value_parser!(u8).range(0..=100))]
    quality: u8,

    /// Target video bitrate in bits per second (overrides --quality).
    #[arg(long)]
    bitrate: Option<u32>,

    /// Audio bitrate in bits per second (AAC, Opus).
    #[arg(long, default_value_t = 128_000)]
    audio_bitrate: u32,

    /// Path to the ffmpeg executable.
    #[arg(long)]
    ffmpeg: Option<String>,

    /// Composite frames on all cores.
    #[arg(long)]
    parallel: bool,
}

#[derive(Parser, Debug)]
struct TimelineArgs {
    /// Project JSON.
    project: PathBuf,
}

#[derive(Parser, Debug)]
struct FrameArgs {
    /// Project JSON.
    project: PathBuf,

    /// Frame index (0-based).
    index: u64,

    /// Output PNG path.
    #[arg(short, long)]
    out: PathBuf,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum ContainerChoice {
    Mp4,
    Webm,
    Mkv,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum CodecChoice {
    Av1,
    H264,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum AudioCodecChoice {
    Pcm,
    Aac,
    Opus,
}

impl From<ContainerChoice> for Container {
    fn from(choice: ContainerChoice) -> Self {
        match choice {
            ContainerChoice::Mp4 => Container::Mp4,
            ContainerChoice::Webm => Container::WebM,
            ContainerChoice::Mkv => Container::Matroska,
        }
    }
}

impl From<CodecChoice> for Codec {
    fn from(choice: CodecChoice) -> Self {
        match choice {
            CodecChoice::Av1 => Codec::Av1,
            CodecChoice::H264 => Codec::H264,
        }
    }
}

impl From<AudioCodecChoice> for AudioCodec {
    fn from(choice: AudioCodecChoice) -> Self {
        match choice {
            AudioCodecChoice::Pcm => AudioCodec::Pcm,
            AudioCodecChoice::Aac => AudioCodec::Aac,
            AudioCodecChoice::Opus => AudioCodec::Opus,
        }
    }
}

fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();
    match cli.cmd {
        Command::Render(args) => cmd_render(args),
        Command::Timeline(args) => cmd_timeline(args),
        Command::Frame(args) => cmd_frame(args),
    }
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .try_init();
}

fn load_project(path: &Path) -> anyhow::Result<ProjectConfig> {
    ProjectConfig::from_json_file(path)
        .with_context(|| format!("load project '{}'", path.display()))
}

fn create_parent_dir(path: &Path) -> anyhow::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("create output dir '{}'", parent.display()))?;
    }
    Ok(())
}

fn cmd_render(args: RenderArgs) -> anyhow::Result<()> {
    let config = load_project(&args.project)?;
    create_parent_dir(&args.out)?;

    let container = Container::from(args.container);
    let extension = args.out.extension().and_then(|e| e.to_str()).unwrap_or("");
    if !extension.eq_ignore_ascii_case(container.extension()) {
        tracing::warn!(
            path = %args.out.display(),
            expected = container.extension(),
            "output extension does not match the container"
        );
    }

    let options = EncodeOptions {
        output_path: args.out.display().to_string(),
        container,
        codec: args.codec.into(),
        audio_codec: args.audio_codec.into(),
        quality: args.quality,
        video_bitrate: args.bitrate,
        audio_bitrate: args.audio_bitrate,
        ffmpeg_path: args.ffmpeg,
        parallel: args.parallel,
    };

    let mut last_message = String::new();
    let output = slidecast::render(&config, &options, |progress| {
        if progress.message != last_message {
            eprintln!("[{:>3.0}%] {}", progress.percent, progress.message);
            last_message = progress.message;
        }
    })
    .with_context(|| format!("render '{}'", args.project.display()))?;

    eprintln!(
        "wrote {} ({} frames, {:.2} s, {}x{})",
        args.out.display(),
        output.frames,
        output.duration,
        output.width,
        output.height
    );
    Ok(())
}

fn cmd_timeline(args: TimelineArgs) -> anyhow::Result<()> {
    let config = load_project(&args.project)?;
    config.validate()?;
    let timeline = Timeline::new(&config);
    println!("{}", serde_json::to_string_pretty(&timeline)?);
    Ok(())
}

fn cmd_frame(args: FrameArgs) -> anyhow::Result<()> {
    let config = load_project(&args.project)?;
    config.validate()?;

    let resources = Resources::load(&config, |_, _| {})?;
    let compositor = Compositor::new(&config, resources)?;
    let frame = compositor.render_frame(args.index)?;

    create_parent_dir(&args.out)?;
    image::save_buffer_with_format(
        &args.out,
        &frame.data,
        frame.width,
        frame.height,
        image::ColorType::Rgba8,
        image::ImageFormat::Png,
    )
    .with_context(|| format!("write png '{}'", args.out.display()))?;

    eprintln!("wrote {}", args.out.display());
    Ok(())
}
