use clap::{Args, Parser, Subcommand};
use prompt_gallery_lib::config::RuntimeConfig;
use prompt_gallery_lib::export::DefaultFetcher;
use prompt_gallery_lib::imagen_api::{AspectRatio, GenerationOptions, ImageStyle, ImagenClient};
use prompt_gallery_lib::runner::{JobOutcome, RunEvent};
use prompt_gallery_lib::{AppState, Notification, NotificationLevel};
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser)]
#[command(
    name = "prompt-gallery",
    version,
    about = "Generate images from a list of prompts and keep them in a local gallery"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate one image per prompt, one prompt per line
    Generate(GenerateArgs),
    /// Manage API keys
    #[command(subcommand)]
    Keys(KeysCommand),
    /// Inspect or edit the gallery
    #[command(subcommand)]
    Gallery(GalleryCommand),
    /// Write images into a ZIP archive
    Export {
        #[command(flatten)]
        selection: SelectionArgs,
        /// Archive path (defaults to pixel-art-pack.zip)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Save a single image to a directory
    Download {
        id: String,
        #[arg(short, long, default_value = ".")]
        dir: PathBuf,
    },
    /// Write an id/filename/prompt listing of images
    Manifest {
        #[command(flatten)]
        selection: SelectionArgs,
        /// json or csv
        #[arg(short, long, default_value = "json")]
        format: String,
        #[arg(short, long)]
        output: PathBuf,
    },
}

#[derive(Args)]
struct GenerateArgs {
    /// Prompts; each argument may hold several lines
    prompts: Vec<String>,
    /// Text files whose contents are appended to the prompts
    #[arg(short, long = "file")]
    files: Vec<PathBuf>,
    /// pixel or stick-figure
    #[arg(long, default_value = "pixel")]
    style: ImageStyle,
    /// 1:1, 16:9, 9:16, 4:3 or 3:4
    #[arg(long, default_value = "1:1")]
    ratio: AspectRatio,
}

#[derive(Subcommand)]
enum KeysCommand {
    /// Replace the key list; keys may be separated by commas, spaces or newlines
    Set { keys: Vec<String> },
    /// Show the configured keys, masked
    Show,
    /// Ask the provider whether each key is accepted
    Check,
}

#[derive(Subcommand)]
enum GalleryCommand {
    List {
        #[arg(long)]
        json: bool,
    },
    Delete {
        id: String,
    },
    /// Remove every image
    Clear {
        /// Confirm deleting all images
        #[arg(long)]
        yes: bool,
    },
}

#[derive(Args)]
struct SelectionArgs {
    /// Image ids to include
    ids: Vec<String>,
    /// Include every image in the gallery
    #[arg(long, conflicts_with = "ids")]
    all: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::init();

    let cli = Cli::parse();
    let config = RuntimeConfig::from_env();
    let state = AppState::open(config);

    match run(cli.command, &state).await {
        Ok(code) => code,
        Err(error) => {
            eprintln!("Error: {}", error);
            ExitCode::FAILURE
        }
    }
}

async fn run(command: Commands, state: &AppState) -> Result<ExitCode, String> {
    match command {
        Commands::Generate(args) => generate(args, state).await,
        Commands::Keys(KeysCommand::Set { keys }) => {
            let response = prompt_gallery_lib::save_settings(&keys.join("\n"), state)?;
            print_notification(&response.notification);
            match response.resume {
                Some(parked) => {
                    println!("Resuming {} parked prompt(s).", parked.prompts.len());
                    run_batch(&parked.prompts.join("\n"), parked.options, state).await
                }
                None => Ok(ExitCode::SUCCESS),
            }
        }
        Commands::Keys(KeysCommand::Show) => {
            let settings = prompt_gallery_lib::get_settings(state)?;
            if settings.key_count == 0 {
                println!("No API keys configured.");
            }
            for (index, key) in settings.masked_keys.iter().enumerate() {
                println!("{}. {}", index + 1, key);
            }
            Ok(ExitCode::SUCCESS)
        }
        Commands::Keys(KeysCommand::Check) => {
            let client = imagen_client(state)?;
            let checks = prompt_gallery_lib::check_credentials(&client, state).await?;
            let all_ok = checks.iter().all(|check| check.status.ok);
            for check in checks {
                let mark = if check.status.ok { "ok" } else { "rejected" };
                println!("{} [{}] {}", check.key, mark, check.status.message);
            }
            Ok(if all_ok {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }
        Commands::Gallery(GalleryCommand::List { json }) => {
            let images = prompt_gallery_lib::list_images(state).await?;
            if json {
                let rendered =
                    serde_json::to_string_pretty(&images).map_err(|e| e.to_string())?;
                println!("{}", rendered);
            } else if images.is_empty() {
                println!("Your gallery is empty.");
            } else {
                for image in images {
                    println!("{}  {}", image.id, image.prompt);
                }
            }
            Ok(ExitCode::SUCCESS)
        }
        Commands::Gallery(GalleryCommand::Delete { id }) => {
            print_notification(&prompt_gallery_lib::delete_image(&id, state).await?);
            Ok(ExitCode::SUCCESS)
        }
        Commands::Gallery(GalleryCommand::Clear { yes }) => {
            if !yes {
                let count = prompt_gallery_lib::list_images(state).await?.len();
                return Err(format!(
                    "This deletes all {} images and cannot be undone. Re-run with --yes.",
                    count
                ));
            }
            print_notification(&prompt_gallery_lib::clear_gallery(state).await?);
            Ok(ExitCode::SUCCESS)
        }
        Commands::Export { selection, output } => {
            apply_selection(&selection, state).await?;
            let fetcher = DefaultFetcher::new().map_err(|e| e.to_string())?;
            let result =
                prompt_gallery_lib::download_selected(output.as_deref(), &fetcher, state).await?;
            println!(
                "Wrote {} images to {} ({} bytes)",
                result.exported_count, result.output_path, result.total_bytes
            );
            Ok(ExitCode::SUCCESS)
        }
        Commands::Download { id, dir } => {
            let fetcher = DefaultFetcher::new().map_err(|e| e.to_string())?;
            let path = prompt_gallery_lib::download_image(&id, &dir, &fetcher, state).await?;
            println!("Saved {}", path.display());
            Ok(ExitCode::SUCCESS)
        }
        Commands::Manifest {
            selection,
            format,
            output,
        } => {
            apply_selection(&selection, state).await?;
            let result = prompt_gallery_lib::export_manifest(&format, &output, state).await?;
            println!(
                "Wrote manifest for {} images to {}",
                result.exported_count, result.output_path
            );
            Ok(ExitCode::SUCCESS)
        }
    }
}

async fn generate(args: GenerateArgs, state: &AppState) -> Result<ExitCode, String> {
    let mut prompt_input = args.prompts.join("\n");
    for file in &args.files {
        prompt_input = prompt_gallery_lib::import_prompts(&prompt_input, file).await?;
    }

    let options = GenerationOptions {
        style: args.style,
        aspect_ratio: args.ratio,
    };
    run_batch(&prompt_input, options, state).await
}

async fn run_batch(
    prompt_input: &str,
    options: GenerationOptions,
    state: &AppState,
) -> Result<ExitCode, String> {
    let client = imagen_client(state)?;
    log::info!("Generating with model {}", client.model());

    let response =
        prompt_gallery_lib::generate_images(state, &client, prompt_input, options, |event| {
            match event {
                RunEvent::Progress(progress) => println!(
                    "({}/{}) {}...",
                    progress.current, progress.total, progress.preview
                ),
                RunEvent::Outcome(JobOutcome::Success(record)) => {
                    println!("  saved {}", record.id)
                }
                RunEvent::Outcome(_) => {}
            }
        })
        .await?;

    for notification in &response.notifications {
        print_notification(notification);
    }
    if let Some(summary) = &response.summary {
        println!(
            "Generated {} of {} images ({} failed)",
            summary.succeeded, summary.total, summary.failed
        );
    }
    if response.settings_required {
        eprintln!("Configure API keys with `prompt-gallery keys set <KEY>...`.");
        return Ok(ExitCode::from(2));
    }
    Ok(ExitCode::SUCCESS)
}

fn imagen_client(state: &AppState) -> Result<ImagenClient, String> {
    ImagenClient::new(
        &state.config.api_base,
        &state.config.model,
        state.config.call_timeout.as_secs(),
    )
    .map_err(|e| format!("Failed to build HTTP client: {}", e))
}

/// Replaces the in-process selection with the requested ids.
async fn apply_selection(selection: &SelectionArgs, state: &AppState) -> Result<(), String> {
    prompt_gallery_lib::deselect_all(state)?;
    if selection.all {
        prompt_gallery_lib::toggle_select_all(state).await?;
        return Ok(());
    }
    if selection.ids.is_empty() {
        return Err("Pass image ids or --all.".to_string());
    }
    for id in &selection.ids {
        if !prompt_gallery_lib::toggle_select(id, state).await? {
            // Listed twice; the second toggle deselected it.
            prompt_gallery_lib::toggle_select(id, state).await?;
        }
    }
    Ok(())
}

fn print_notification(notification: &Notification) {
    match notification.level {
        NotificationLevel::Error => eprintln!("{}", notification.message),
        NotificationLevel::Success | NotificationLevel::Info => println!("{}", notification.message),
    }
}
