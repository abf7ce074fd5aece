use askdoc::api::{ApiClient, UploadOutcome};
use askdoc::composer::{Composer, SendMode};
use askdoc::conversation::{Conversation, Sender};
use askdoc::files::{forward_selection, FileLibrary};
use askdoc::identity::IdentityStore;
use askdoc::store::DayStore;
use clap::{Parser, Subcommand};
use std::io::Write;
use std::path::PathBuf;
use tokio::sync::watch;

#[derive(Parser)]
#[command(name = "askdoc")]
#[command(about = "Streaming chat and document questions against an askdoc service", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show version
    Version,

    /// Create the configuration directory and a default config file.
    Init {
        /// Config file path (default: ASKDOC_CONFIG_PATH or ~/.askdoc/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,
    },

    /// Interactive chat. Type /help inside for commands.
    Chat {
        /// Config file path (default: ASKDOC_CONFIG_PATH or ~/.askdoc/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,
    },

    /// List uploaded files.
    Files {
        /// Config file path (default: ASKDOC_CONFIG_PATH or ~/.askdoc/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,
    },

    /// Upload files and wait for indexing to finish.
    Upload {
        /// Config file path (default: ASKDOC_CONFIG_PATH or ~/.askdoc/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,

        /// Return right after the upload is accepted.
        #[arg(long)]
        no_wait: bool,

        /// Files to upload (.mp3, .mp4, .m4a, .wav, .pdf, .docx, .doc, .txt).
        #[arg(required = true, value_name = "FILE")]
        paths: Vec<PathBuf>,
    },

    /// Re-index a stored file.
    Embed {
        /// Config file path (default: ASKDOC_CONFIG_PATH or ~/.askdoc/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,

        file_id: String,

        file_url: String,
    },

    /// Store the access token used for chat requests (valid until midnight).
    Token {
        /// Config file path (default: ASKDOC_CONFIG_PATH or ~/.askdoc/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,

        /// Forget the stored token instead.
        #[arg(long, conflicts_with = "token")]
        clear: bool,

        #[arg(required_unless_present = "clear")]
        token: Option<String>,
    },
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let cli = Cli::parse();

    let result = match cli.command {
        Some(Commands::Version) => {
            println!("askdoc {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        Some(Commands::Init { config }) => run_init(config),
        Some(Commands::Chat { config }) => run_chat(config).await,
        Some(Commands::Files { config }) => run_files(config).await,
        Some(Commands::Upload {
            config,
            no_wait,
            paths,
        }) => run_upload(config, paths, no_wait).await,
        Some(Commands::Embed {
            config,
            file_id,
            file_url,
        }) => run_embed(config, file_id, file_url).await,
        Some(Commands::Token {
            config,
            clear,
            token,
        }) => run_token(config, token, clear),
        None => {
            println!("Run with --help for usage");
            Ok(())
        }
    };
    if let Err(e) = result {
        log::error!("{:#}", e);
        std::process::exit(1);
    }
}

/// Loaded config plus everything derived from it.
struct Context {
    api: ApiClient,
    identity: IdentityStore,
    access_token: Option<String>,
}

fn load_context(config_path: Option<PathBuf>) -> anyhow::Result<Context> {
    let (config, path) = askdoc::config::load_config(config_path)?;
    let store = DayStore::open(
        askdoc::config::resolve_store_path(&config, &path),
        config.identity.namespace.clone(),
    );
    Ok(Context {
        api: ApiClient::from_config(&config),
        identity: IdentityStore::new(store),
        access_token: askdoc::config::resolve_access_token(&config),
    })
}

fn run_init(config_path: Option<PathBuf>) -> anyhow::Result<()> {
    let path = config_path.unwrap_or_else(askdoc::config::default_config_path);
    let dir = askdoc::init::init_config_dir(&path)?;
    println!("initialized configuration at {}", dir.display());
    Ok(())
}

fn run_token(config_path: Option<PathBuf>, token: Option<String>, clear: bool) -> anyhow::Result<()> {
    let ctx = load_context(config_path)?;
    match token {
        Some(token) if !clear => {
            ctx.identity.set_access_token(&token, chrono::Local::now())?;
            println!("access token stored until midnight");
        }
        _ => {
            ctx.identity.clear_access_token()?;
            println!("stored access token cleared");
        }
    }
    Ok(())
}

async fn run_files(config_path: Option<PathBuf>) -> anyhow::Result<()> {
    let ctx = load_context(config_path)?;
    let mut library = FileLibrary::new(ctx.api);
    library.list_files().await?;
    print_files(&library);
    Ok(())
}

async fn run_upload(config_path: Option<PathBuf>, paths: Vec<PathBuf>, no_wait: bool) -> anyhow::Result<()> {
    let ctx = load_context(config_path)?;
    let mut library = FileLibrary::new(ctx.api);
    let outcome = if no_wait {
        library.upload(&paths).await?
    } else {
        library.upload_and_track(&paths, print_status).await?
    };
    report_upload(&outcome);
    if !no_wait {
        print_files(&library);
    }
    Ok(())
}

async fn run_embed(config_path: Option<PathBuf>, file_id: String, file_url: String) -> anyhow::Result<()> {
    let ctx = load_context(config_path)?;
    let reply = ctx.api.embed_file(&file_id, &file_url).await?;
    println!("{}", serde_json::to_string_pretty(&reply)?);
    Ok(())
}

fn print_status(label: &str) {
    println!("… {}", label);
}

fn report_upload(outcome: &UploadOutcome) {
    match outcome {
        UploadOutcome::Queued { task_id } => println!("upload accepted (task {})", task_id),
        UploadOutcome::Duplicate {
            filename,
            uploadtime,
        } => println!("{} was already uploaded on {}", filename, uploadtime),
        UploadOutcome::Indexed { filenames } => println!("indexed {}", filenames.join(", ")),
    }
}

fn print_files(library: &FileLibrary) {
    if library.files().is_empty() {
        println!("no documents uploaded yet");
        return;
    }
    for (i, file) in library.files().iter().enumerate() {
        let mark = if library.selection().contains(&file.file_id) {
            "[x]"
        } else {
            "[ ]"
        };
        println!(
            "{:>3} {} {} - {} ({})",
            i + 1,
            mark,
            file.uploadtime,
            file.filename,
            file.file_id
        );
    }
}

/// Prints the tail of the trailing received message as it grows.
#[derive(Default)]
struct LivePrinter {
    printed: usize,
    open: bool,
}

impl LivePrinter {
    fn update(&mut self, conversation: &Conversation) {
        let Some(last) = conversation.messages().last() else {
            return;
        };
        if last.sender != Sender::Received {
            return;
        }
        let mut stdout = std::io::stdout();
        if !self.open {
            self.open = true;
            self.printed = 0;
            let _ = write!(stdout, "< ");
        }
        if let Some(delta) = last.text.get(self.printed..) {
            let _ = write!(stdout, "{}", delta);
            self.printed = last.text.len();
        }
        let _ = stdout.flush();
    }

    fn finish(&mut self) {
        if self.open {
            println!();
        }
        self.open = false;
        self.printed = 0;
    }
}

/// Resolve `/select 3` (list position) or `/select 1690000001` (file id).
fn resolve_file_id(library: &FileLibrary, arg: &str) -> Option<String> {
    if let Some(file) = library.files().iter().find(|f| f.file_id == arg) {
        return Some(file.file_id.clone());
    }
    let n: usize = arg.parse().ok()?;
    library
        .files()
        .get(n.checked_sub(1)?)
        .map(|f| f.file_id.clone())
}

const HELP: &str = "\
  <text>            chat
  /ask <question>   ask the selected documents
  /new              start a new topic
  /files            list documents
  /select <n|id>..  select documents (at most 10)
  /unselect <n|id>..
  /upload <path>..  upload and index files
  /history          show the conversation
  /quit";

async fn run_chat(config_path: Option<PathBuf>) -> anyhow::Result<()> {
    let ctx = load_context(config_path)?;
    let now = chrono::Local::now();
    let session = ctx.identity.load(now, ctx.access_token.clone())?;

    let (tx, rx) = watch::channel(Vec::new());
    let mut library = FileLibrary::new(ctx.api.clone());
    library.on_selection_change(forward_selection(tx));
    if let Err(e) = library.list_files().await {
        log::warn!("could not fetch file list: {}", e);
    }
    let host = ctx.api.host().to_string();
    let mut composer = Composer::new(ctx.api, ctx.identity, session, ctx.access_token, rx);

    let stdin = std::io::stdin();
    let mut stdout = std::io::stdout();
    println!("askdoc chat with {}: /help for commands", host);

    loop {
        write!(stdout, "> ")?;
        stdout.flush()?;
        let mut line = String::new();
        if stdin.read_line(&mut line)? == 0 {
            break;
        }
        let input = line.trim();
        if input.is_empty() {
            continue;
        }
        let (command, rest) = match input.split_once(char::is_whitespace) {
            Some((c, r)) => (c, r.trim()),
            None => (input, ""),
        };

        match command {
            "/quit" | "/exit" => break,
            "/help" => println!("{}", HELP),
            "/new" => match composer.new_topic(chrono::Local::now()) {
                Ok(true) => println!("--- new topic ---"),
                Ok(false) => {}
                Err(e) => eprintln!("could not start a new topic: {}", e),
            },
            "/files" => match library.list_files().await {
                Ok(_) => print_files(&library),
                Err(e) => eprintln!("could not fetch file list: {}", e),
            },
            "/select" | "/unselect" => {
                let checked = command == "/select";
                for arg in rest.split_whitespace() {
                    let Some(id) = resolve_file_id(&library, arg) else {
                        eprintln!("no such document: {}", arg);
                        continue;
                    };
                    if let Err(e) = library.toggle_selection(&id, checked) {
                        eprintln!("{}", e);
                        break;
                    }
                }
                print_files(&library);
            }
            "/upload" => {
                let paths: Vec<PathBuf> = rest.split_whitespace().map(PathBuf::from).collect();
                if paths.is_empty() {
                    eprintln!("usage: /upload <path>...");
                    continue;
                }
                match library.upload_and_track(&paths, print_status).await {
                    Ok(outcome) => {
                        report_upload(&outcome);
                        print_files(&library);
                    }
                    Err(e) => eprintln!("upload failed: {}", e),
                }
            }
            "/history" => {
                let at = chrono::Local::now();
                for message in composer.conversation().messages() {
                    println!("{}\n", askdoc::render::render_message(message, at));
                }
            }
            "/ask" => {
                if rest.is_empty() {
                    eprintln!("usage: /ask <question>");
                    continue;
                }
                send(&mut composer, rest, SendMode::AskDoc).await;
            }
            _ if command.starts_with('/') => eprintln!("unknown command {} (try /help)", command),
            _ => send(&mut composer, input, SendMode::Chat).await,
        }
    }

    Ok(())
}

async fn send(composer: &mut Composer, input: &str, mode: SendMode) {
    let mut printer = LivePrinter::default();
    let result = composer
        .send(input, mode, |conversation| printer.update(conversation))
        .await;
    printer.finish();
    if let Err(e) = result {
        eprintln!("chat error: {}", e);
    }
}
