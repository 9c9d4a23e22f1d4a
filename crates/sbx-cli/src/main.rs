//! sbx: shardbox command line
//!
//! Commands:
//!   keygen              - create a new keyfile
//!   scan                - scan a tree into the local sealed catalog
//!   upload              - scan and mirror a tree into a store directory
//!   clean               - remove stray blobs from the store
//!   ls / cat            - browse the mirrored tree through the read path

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::warn;
use tracing_subscriber::EnvFilter;

use sbx_catalog::{make_bundles, scan_tree, unseal_from_file, Catalog};
use sbx_crypto::Keyfile;
use sbx_engine::{CachedStore, DirStore, ObjectStore, SectorCache, VirtualFs};

#[derive(Parser, Debug)]
#[command(
    name = "sbx",
    version,
    about = "Content-addressed encrypted mirror of a local tree onto a blob store"
)]
struct Cli {
    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short = 'v', long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create a new keyfile (refuses to overwrite)
    Keygen {
        /// Path for the new keyfile
        #[arg(short, long, default_value = "key.dat")]
        keyfile: PathBuf,
    },

    /// Scan a folder and create or update the sealed catalog file
    Scan {
        /// Folder with the plaintext files (becomes the mirror root)
        #[arg(short = 'o', long, default_value = "data")]
        root: PathBuf,
        /// Path of the sealed catalog file
        #[arg(short = 'd', long, default_value = "index.db2")]
        catalog: PathBuf,
        /// Path of the keyfile
        #[arg(short, long, default_value = "key.dat")]
        keyfile: PathBuf,
        /// Rewrite the catalog even when nothing changed
        #[arg(short, long)]
        force: bool,
        /// Do not pack small files into bundles
        #[arg(short, long)]
        no_bundle: bool,
    },

    /// Scan and upload all missing blobs to the store
    Upload {
        /// Folder with the plaintext files (becomes the mirror root)
        #[arg(short = 'o', long, default_value = "data")]
        root: PathBuf,
        /// Path of the sealed catalog file
        #[arg(short = 'd', long, default_value = "index.db2")]
        catalog: PathBuf,
        /// Path of the keyfile
        #[arg(short, long, default_value = "key.dat")]
        keyfile: PathBuf,
        /// Store directory (the flat blob namespace)
        #[arg(short, long)]
        store: PathBuf,
        /// Upload even when the scan found no changes
        #[arg(short, long)]
        force: bool,
        /// Do not pack small files into bundles
        #[arg(short, long)]
        no_bundle: bool,
        /// Remove stray blobs after the upload
        #[arg(short, long)]
        cleanup: bool,
        /// With --cleanup: log removals without deleting anything
        #[arg(short = 'y', long)]
        dry_run_cleanup: bool,
    },

    /// Remove blobs the catalog no longer references
    Clean {
        /// Path of the sealed catalog file
        #[arg(short = 'd', long, default_value = "index.db2")]
        catalog: PathBuf,
        /// Path of the keyfile
        #[arg(short, long, default_value = "key.dat")]
        keyfile: PathBuf,
        /// Store directory (the flat blob namespace)
        #[arg(short, long)]
        store: PathBuf,
        /// Log removals without deleting anything
        #[arg(short = 'y', long)]
        dry_run: bool,
    },

    /// List a folder of the mirrored tree
    Ls {
        /// Path inside the mirrored tree
        #[arg(default_value = "/")]
        path: String,
        /// Path of the keyfile
        #[arg(short, long, default_value = "key.dat")]
        keyfile: PathBuf,
        /// Store directory (the flat blob namespace)
        #[arg(short, long)]
        store: PathBuf,
    },

    /// Print a file of the mirrored tree to stdout
    Cat {
        /// Path inside the mirrored tree
        path: String,
        /// Path of the keyfile
        #[arg(short, long, default_value = "key.dat")]
        keyfile: PathBuf,
        /// Store directory (the flat blob namespace)
        #[arg(short, long)]
        store: PathBuf,
    },
}

fn main() {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = run(cli.command) {
        eprintln!("fatal: {e:#}");
        std::process::exit(1);
    }
}

fn run(command: Commands) -> Result<()> {
    match command {
        Commands::Keygen { keyfile } => {
            sbx_crypto::create_keyfile(&keyfile)
                .with_context(|| format!("creating keyfile {}", keyfile.display()))?;
            println!("keyfile created: {}", keyfile.display());
            Ok(())
        }

        Commands::Scan {
            root,
            catalog,
            keyfile,
            force,
            no_bundle,
        } => {
            if let Some((kf, new_catalog)) =
                scan_into_catalog(&root, &catalog, &keyfile, force, no_bundle)?
            {
                sbx_catalog::seal_to_file(&new_catalog, &kf.index_key(), &catalog)
                    .context("writing catalog file")?;
                println!("catalog written: {}", catalog.display());
            }
            Ok(())
        }

        Commands::Upload {
            root,
            catalog,
            keyfile,
            store,
            force,
            no_bundle,
            cleanup,
            dry_run_cleanup,
        } => {
            let Some((kf, new_catalog)) =
                scan_into_catalog(&root, &catalog, &keyfile, force, no_bundle)?
            else {
                return Ok(()); // nothing changed
            };

            let store = DirStore::new(&store).context("opening store directory")?;
            sbx_engine::upload(&root, &new_catalog, &kf.index_key(), &store)
                .context("upload failed")?;

            if cleanup {
                let stats = sbx_engine::clean(&new_catalog, &store, dry_run_cleanup)
                    .context("cleanup failed")?;
                println!("cleanup: {} blobs removed", stats.removed);
            }

            // refresh the local catalog cache only after a successful run
            sbx_catalog::seal_to_file(&new_catalog, &kf.index_key(), &catalog)
                .context("writing catalog file")?;
            println!("upload complete: {} entries", new_catalog.files.len());
            Ok(())
        }

        Commands::Clean {
            catalog,
            keyfile,
            store,
            dry_run,
        } => {
            let kf = load_keyfile(&keyfile)?;
            let cat = unseal_from_file(&catalog, &kf.index_key())
                .context("loading catalog file")?;
            let store = DirStore::new(&store).context("opening store directory")?;

            let stats = sbx_engine::clean(&cat, &store, dry_run).context("clean failed")?;
            println!("clean: {} blobs removed", stats.removed);
            Ok(())
        }

        Commands::Ls {
            path,
            keyfile,
            store,
        } => {
            let vfs = open_vfs(&keyfile, &store)?;
            let entry = vfs.stat(&path)?;
            if entry.is_dir {
                for e in &entry.folder_content {
                    let marker = if e.is_dir { "/" } else { "" };
                    println!("{}{marker}", e.name);
                }
            } else {
                println!("{}\t{}", entry.file_size, entry.rel_path);
            }
            Ok(())
        }

        Commands::Cat {
            path,
            keyfile,
            store,
        } => {
            let vfs = open_vfs(&keyfile, &store)?;
            let file = vfs.open_file(&path)?;

            let stdout = std::io::stdout();
            let mut out = stdout.lock();
            let mut buf = vec![0u8; 256 * 1024];
            loop {
                let n = file.read(&mut buf)?;
                if n == 0 {
                    break;
                }
                out.write_all(&buf[..n])?;
            }
            Ok(())
        }
    }
}

fn load_keyfile(path: &PathBuf) -> Result<Keyfile> {
    Keyfile::load(path).with_context(|| format!("loading keyfile {}", path.display()))
}

/// Shared scan step of `scan` and `upload`. Returns `None` when nothing
/// changed and no force flag was given.
fn scan_into_catalog(
    root: &PathBuf,
    catalog_path: &PathBuf,
    keyfile_path: &PathBuf,
    force: bool,
    no_bundle: bool,
) -> Result<Option<(Keyfile, Catalog)>> {
    let kf = load_keyfile(keyfile_path)?;

    // a broken local catalog only costs a full rescan
    let old = match unseal_from_file(catalog_path, &kf.index_key()) {
        Ok(c) => c,
        Err(e) => {
            warn!(error = %e, "cannot read old catalog, rescanning from scratch");
            Catalog::new()
        }
    };

    let outcome = scan_tree(root, &old, &kf).context("scan failed")?;
    println!("{}", outcome.summary);

    if !outcome.changed && !force {
        println!("no changes");
        return Ok(None);
    }

    let mut catalog = outcome.catalog;
    if !no_bundle {
        make_bundles(&mut catalog, &kf);
        println!("bundles: {}", catalog.bundles.len());
    }

    Ok(Some((kf, catalog)))
}

fn open_vfs(keyfile: &PathBuf, store: &PathBuf) -> Result<Arc<VirtualFs>> {
    let kf = load_keyfile(keyfile)?;
    // a small sector cache keeps window reads off the store
    let cache = Arc::new(SectorCache::new(64));
    let store: Arc<dyn ObjectStore> =
        Arc::new(CachedStore::new(DirStore::new(store)?, cache));
    store.update().context("listing store")?;

    let vfs = VirtualFs::new(store, kf.index_key());
    if !vfs.refresh() {
        anyhow::bail!("no readable index blob in the store");
    }
    Ok(vfs)
}
