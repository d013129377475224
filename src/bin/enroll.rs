//! enroll - manage the enrollment photo directory
//!
//! Copies photos into `<faces_dir>/<name>/` (or removes the identity) and
//! invalidates the signature cache so the next daemon startup rebuilds.
//! With `--rebuild` the rebuild happens eagerly so startup stays fast.

use anyhow::{anyhow, Result};
use clap::Parser;
use std::io::IsTerminal;
use std::path::PathBuf;

use vigil::ui::Ui;
use vigil::{
    build_engine, import_photos, rebuild_store, remove_identity, SignatureCache,
};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Identity to enroll (letters, digits, '_' and '-' only).
    #[arg(long)]
    name: String,

    /// Photo files to import for the identity.
    photos: Vec<PathBuf>,

    /// Remove the identity's photos instead of importing.
    #[arg(long, conflicts_with = "photos")]
    remove: bool,

    /// Enrollment directory (one subdirectory per identity).
    #[arg(long, env = "VIGIL_FACES_DIR", default_value = "faces")]
    faces_dir: PathBuf,

    /// Signature cache file to invalidate.
    #[arg(long, env = "VIGIL_CACHE_PATH", default_value = "faces/signatures.json")]
    cache_path: PathBuf,

    /// Face engine used when rebuilding eagerly.
    #[arg(long, default_value = "stub")]
    engine: String,

    /// Rebuild the signature cache now instead of at next daemon startup.
    #[arg(long)]
    rebuild: bool,

    /// UI mode for stderr progress (auto|plain|pretty).
    #[arg(long, default_value = "auto", value_name = "MODE")]
    ui: String,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let args = Args::parse();
    let ui = Ui::from_flag(Some(args.ui.as_str()), std::io::stderr().is_terminal());
    let cache = SignatureCache::new(args.cache_path.clone());

    if args.remove {
        let stage = ui.stage(&format!("Remove identity {}", args.name));
        if remove_identity(&args.faces_dir, &args.name)? {
            stage.note("photos removed");
        } else {
            stage.note("identity was not enrolled");
        }
    } else {
        if args.photos.is_empty() {
            return Err(anyhow!("no photos given (or pass --remove)"));
        }
        let stage = ui.stage(&format!("Import photos for {}", args.name));
        let copied = import_photos(&args.faces_dir, &args.name, &args.photos)?;
        stage.note(&format!(
            "{copied} photo(s) copied into {}",
            args.faces_dir.join(&args.name).display()
        ));
    }

    {
        // Enrollment changed; the cached embeddings no longer describe it.
        let _stage = ui.stage("Invalidate signature cache");
        cache.invalidate()?;
    }

    if args.rebuild {
        let engine = build_engine(&args.engine)?;
        let outcome = {
            let stage = ui.stage("Rebuild signatures");
            let outcome = rebuild_store(&args.faces_dir, engine.as_ref())?;
            stage.note(&format!(
                "{} identities, {} embeddings ({} image(s) skipped)",
                outcome.store.identity_count(),
                outcome.store.embedding_count(),
                outcome.images_skipped
            ));
            outcome
        };
        let _stage = ui.stage("Write signature cache");
        cache.save(&outcome.store, engine.as_ref())?;
    }

    Ok(())
}
