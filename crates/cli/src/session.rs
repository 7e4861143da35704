use std::path::PathBuf;
use std::sync::Arc;

use shotsync_core::config::{ServerConfig, SyncConfig};
use shotsync_core::http::HttpStore;
use shotsync_core::mock::MockStore;
use shotsync_core::model::{ErrorNotice, ModelEvent, ScreenshotsModel};
use shotsync_core::store::ScreenshotStore;
use shotsync_core::{Error, Platform, Result, ScreenshotSet, Upload};
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, warn};

const SRC_PREVIEW_CHARS: usize = 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    List,
    Upload,
    Delete,
    Rename,
}

impl Command {
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "list" => Some(Command::List),
            "upload" => Some(Command::Upload),
            "delete" => Some(Command::Delete),
            "rename" => Some(Command::Rename),
            _ => None,
        }
    }
}

#[derive(Debug, Default)]
pub struct SessionArgs {
    pub test: Option<String>,
    pub url: Option<String>,
    pub project: Option<String>,
    pub mock: bool,
    pub config: Option<PathBuf>,
    pub platform: Option<String>,
    pub index: Option<usize>,
    pub name: Option<String>,
    pub files: Vec<PathBuf>,
}

impl SessionArgs {
    pub fn parse(mut args: impl Iterator<Item = String>) -> Result<Self> {
        let mut out = SessionArgs::default();
        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--test" => out.test = args.next(),
                "--url" => out.url = args.next(),
                "--project" => out.project = args.next(),
                "--mock" => out.mock = true,
                "--config" => out.config = args.next().map(PathBuf::from),
                "--platform" => out.platform = args.next(),
                "--name" => out.name = args.next(),
                "--index" => {
                    let raw = args.next().unwrap_or_default();
                    let index = raw.parse().map_err(|_| {
                        Error::InvalidArgument(format!("--index expects a number, got {raw:?}"))
                    })?;
                    out.index = Some(index);
                }
                flag if flag.starts_with("--") => {
                    return Err(Error::InvalidArgument(format!("unknown arg: {flag}")));
                }
                _ => out.files.push(PathBuf::from(arg)),
            }
        }
        Ok(out)
    }

    fn required_index(&self) -> Result<usize> {
        self.index
            .ok_or_else(|| Error::InvalidArgument("missing --index <n>".to_string()))
    }

    fn required_name(&self) -> Result<String> {
        self.name
            .clone()
            .ok_or_else(|| Error::InvalidArgument("missing --name <name>".to_string()))
    }

    fn platform(&self, config: &SyncConfig) -> Result<Platform> {
        let raw = self
            .platform
            .as_deref()
            .ok_or_else(|| Error::InvalidArgument("missing --platform <key>".to_string()))?;
        let platform = Platform::new(raw);
        if !config.platforms.contains(&platform) {
            return Err(Error::InvalidArgument(format!(
                "unknown platform {raw}, expected one of: {}",
                join_platforms(&config.platforms)
            )));
        }
        Ok(platform)
    }

    fn server(&self, config: &SyncConfig) -> Result<ServerConfig> {
        let configured = config.server.as_ref();
        let base_url = self
            .url
            .clone()
            .or_else(|| configured.map(|server| server.base_url.clone()))
            .ok_or_else(|| Error::InvalidArgument("missing --url <base url> (or --mock)".into()))?;
        let project_id = self
            .project
            .clone()
            .or_else(|| configured.map(|server| server.project_id.clone()))
            .ok_or_else(|| Error::InvalidArgument("missing --project <id>".into()))?;
        Ok(ServerConfig {
            base_url,
            project_id,
        })
    }
}

/// Runs one command against a freshly loaded model. Returns the number of
/// error notifications the model emitted.
pub async fn run(command: Command, args: SessionArgs) -> Result<usize> {
    let config = SyncConfig::load_or_default(args.config.as_deref())?;
    let test = args
        .test
        .clone()
        .ok_or_else(|| Error::InvalidArgument("missing --test <id>".to_string()))?;
    let action = Action::from_args(command, &args, &config)?;
    let store = build_store(&args, &config)?;

    let model = ScreenshotsModel::new(test, store, &config);
    let reporter = tokio::spawn(report_events(model.subscribe()));

    model.load().await;
    if model.has_loaded() {
        apply(&model, action).await;
        print_sets(&model.screenshots());
    }

    drop(model);
    let failures = reporter
        .await
        .map_err(|err| Error::InvalidArgument(format!("event reporter failed: {err}")))?;
    Ok(failures)
}

enum Action {
    List,
    Upload {
        platform: Platform,
        files: Vec<PathBuf>,
        index: Option<usize>,
        name: Option<String>,
    },
    Delete {
        index: usize,
        platform: Platform,
    },
    Rename {
        index: usize,
        name: String,
    },
}

impl Action {
    fn from_args(command: Command, args: &SessionArgs, config: &SyncConfig) -> Result<Self> {
        match command {
            Command::List => Ok(Action::List),
            Command::Upload => {
                if args.files.is_empty() {
                    return Err(Error::InvalidArgument("no files to upload".to_string()));
                }
                if args.name.is_some() && args.files.len() != 1 {
                    return Err(Error::InvalidArgument(
                        "--name can only be used with a single file".to_string(),
                    ));
                }
                Ok(Action::Upload {
                    platform: args.platform(config)?,
                    files: args.files.clone(),
                    index: args.index,
                    name: args.name.clone(),
                })
            }
            Command::Delete => Ok(Action::Delete {
                index: args.required_index()?,
                platform: args.platform(config)?,
            }),
            Command::Rename => Ok(Action::Rename {
                index: args.required_index()?,
                name: args.required_name()?,
            }),
        }
    }
}

async fn apply(model: &ScreenshotsModel, action: Action) {
    match action {
        Action::List => {}
        Action::Upload {
            platform,
            files,
            index,
            name,
        } => {
            let count = model.screenshots().len();
            let target = index.map_or(count, |index| index.min(count));
            let uploads = files.into_iter().map(Upload::from_path).collect();
            model.add_uploaded_files(uploads, index, &platform).await;
            if let Some(name) = name {
                model.set_name(target, name);
            }
            model.save().await;
        }
        Action::Delete { index, platform } => {
            model.delete_file(index, &platform);
            model.save().await;
        }
        Action::Rename { index, name } => {
            model.set_name(index, name);
            model.save().await;
        }
    }
}

fn build_store(args: &SessionArgs, config: &SyncConfig) -> Result<Arc<dyn ScreenshotStore>> {
    if args.mock {
        return Ok(Arc::new(MockStore::from_config(config)));
    }
    let server = args.server(config)?;
    Ok(Arc::new(HttpStore::from_config(&server)))
}

async fn report_events(mut rx: broadcast::Receiver<ModelEvent>) -> usize {
    let mut failures = 0;
    loop {
        match rx.recv().await {
            Ok(ModelEvent::Waiting) => eprintln!("waiting for the screenshot store..."),
            Ok(ModelEvent::Saved) => eprintln!("saved"),
            Ok(ModelEvent::Error(notice)) => {
                failures += 1;
                eprintln!("error: {}", describe(&notice));
            }
            Ok(ModelEvent::Changed(sets)) => debug!(sets = sets.len(), "screenshots changed"),
            Err(RecvError::Lagged(skipped)) => warn!(skipped, "event reporter fell behind"),
            Err(RecvError::Closed) => break,
        }
    }
    failures
}

fn describe(notice: &ErrorNotice) -> String {
    let mut out = match &notice.error_for {
        Some(action) => format!("could not {action}: {}", notice.message),
        None => notice.message.clone(),
    };
    if let (None, Some(reason)) = (&notice.error_for, &notice.reason) {
        out.push_str(&format!(" ({reason})"));
    }
    out
}

fn print_sets(sets: &[ScreenshotSet]) {
    if sets.is_empty() {
        println!("no screenshot sets");
        return;
    }
    for (index, set) in sets.iter().enumerate() {
        let marker = if set.changed { " *" } else { "" };
        println!("{index:>3}  {} [{}]{marker}", display_name(set), display_id(set.id));
        for (platform, file) in &set.files {
            if file.is_empty() {
                continue;
            }
            println!(
                "       {platform:<8} [{}] {}",
                display_id(file.id),
                shorten(&file.src)
            );
        }
    }
}

fn display_name(set: &ScreenshotSet) -> &str {
    if set.name.is_empty() {
        "(unnamed)"
    } else {
        &set.name
    }
}

fn display_id(id: Option<u64>) -> String {
    id.map(|id| id.to_string())
        .unwrap_or_else(|| "new".to_string())
}

fn shorten(src: &str) -> String {
    if src.chars().count() <= SRC_PREVIEW_CHARS {
        return src.to_string();
    }
    let head: String = src.chars().take(SRC_PREVIEW_CHARS).collect();
    format!("{head}...")
}

fn join_platforms(platforms: &[Platform]) -> String {
    platforms
        .iter()
        .map(Platform::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}
