use anyhow::{Context as _, Result, bail};
use clap::{Parser, Subcommand};
mod auth;
use nestsh::config::{self, Config};
use nestsh::transfer::{Transfer, format_size};
use nestsh::{Context, KdfParams, ServerEntry, StoreError, crypto, parse_address, transport};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::warn;
use tracing_subscriber::EnvFilter;

#[derive(Debug, clap::Args)]
struct Argon2Args {
    /// Argon2 memory cost in KiB (default: 65536)
    #[arg(long = "argon-mem")]
    mem_cost_kib: Option<u32>,

    /// Argon2 time cost / iterations (default: 1)
    #[arg(long = "argon-time")]
    time_cost: Option<u32>,

    /// Argon2 parallelism (default: 4)
    #[arg(long = "argon-parallelism")]
    parallelism: Option<u32>,
}

impl Argon2Args {
    fn to_kdf_params(&self) -> Result<KdfParams> {
        let default = KdfParams::default();

        Ok(KdfParams::new(
            self.mem_cost_kib.unwrap_or(default.mem_cost_kib()),
            self.time_cost.unwrap_or(default.time_cost()),
            self.parallelism.unwrap_or(default.parallelism()),
        )?)
    }
}

#[derive(Debug, Parser)]
#[command(name = "nestsh")]
#[command(
    version,
    about = "Encrypted SSH credential store with a built-in scp client."
)]
struct Cli {
    /// Path to the store file
    #[arg(long, global = true, value_name = "PATH", env = "NESTSH_STORE")]
    store: Option<PathBuf>,

    /// Keyfile mixed into the encryption key
    #[arg(long, global = true, value_name = "PATH", env = "NESTSH_KEYFILE")]
    keyfile: Option<PathBuf>,

    /// Path to the config file
    #[arg(long, global = true, value_name = "PATH", env = "NESTSH_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Creates an empty store
    Init {
        #[command(flatten)]
        argon2: Argon2Args,

        /// Write a fresh random keyfile to the --keyfile path first
        #[arg(long)]
        generate_keyfile: bool,
    },

    /// Saves a server under a name
    #[command(arg_required_else_help = true)]
    Add {
        name: String,
        /// user@host[:port]
        address: String,
    },

    /// Lists saved servers
    List,

    /// Deletes a saved server
    #[command(arg_required_else_help = true)]
    Remove {
        name: String,

        /// Do not ask for confirmation
        #[arg(short, long)]
        yes: bool,
    },

    /// Renames a saved server
    #[command(arg_required_else_help = true)]
    Rename { old: String, new: String },

    /// Changes a saved server's address or password
    #[command(arg_required_else_help = true)]
    Edit {
        name: String,

        #[arg(long)]
        user: Option<String>,

        #[arg(long)]
        host: Option<String>,

        #[arg(long, value_parser = clap::value_parser!(u16).range(1..))]
        port: Option<u16>,

        /// Prompt for a new server password
        #[arg(long)]
        password: bool,
    },

    /// Changes the encryption password and re-encrypts every server
    Passwd {
        /// Keyfile to use from now on
        #[arg(long, value_name = "PATH")]
        new_keyfile: Option<PathBuf>,

        /// Create the new keyfile instead of reading it
        #[arg(long, requires = "new_keyfile")]
        generate_keyfile: bool,

        /// Stop using a keyfile
        #[arg(long, conflicts_with = "new_keyfile")]
        remove_keyfile: bool,
    },

    /// Copies one file to or from a saved server (name:path)
    #[command(arg_required_else_help = true)]
    Scp { src: String, dst: String },

    /// Opens an interactive ssh session
    #[command(arg_required_else_help = true)]
    Connect { name: String },

    /// Prints server names, one per line
    #[command(hide = true)]
    Names,
}

/// Paths resolved from flags, env and the config file.
struct Resolved {
    ctx: Context,
    config: Config,
    config_path: PathBuf,
    store_from_flag: bool,
    keyfile_from_flag: bool,
}

fn resolve(cli: &Cli) -> Result<Resolved> {
    let config_path = match &cli.config {
        Some(p) => p.clone(),
        None => config::default_config_path()?,
    };
    let config = Config::load_from(&config_path)?;

    let store_path = match (&cli.store, &config.storage_path) {
        (Some(p), _) | (None, Some(p)) => p.clone(),
        (None, None) => config::default_store_dir()?.join(config::STORE_FILE_NAME),
    };
    let keyfile = cli.keyfile.clone().or_else(|| config.keyfile_path.clone());

    Ok(Resolved {
        ctx: Context::new(store_path).with_keyfile(keyfile),
        config,
        config_path,
        store_from_flag: cli.store.is_some(),
        keyfile_from_flag: cli.keyfile.is_some(),
    })
}

fn init_tracing() {
    let env_filter =
        EnvFilter::try_from_env("NESTSH_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> Result<()> {
    // ssh runs us as its askpass helper with the prompt as the only argument
    if let Some(secret) = transport::askpass_reply() {
        println!("{}", secret.as_str());
        return Ok(());
    }

    init_tracing();
    let cli = Cli::parse();
    let Resolved {
        ctx,
        mut config,
        config_path,
        store_from_flag,
        keyfile_from_flag,
    } = resolve(&cli)?;

    match cli.command {
        Commands::Init {
            argon2,
            generate_keyfile,
        } => {
            let kdf = argon2.to_kdf_params()?;
            if ctx.storage().exists() {
                bail!(StoreError::AlreadyExists(ctx.store_path().to_path_buf()));
            }
            let generated = if generate_keyfile {
                let path = ctx
                    .keyfile()
                    .context("--generate-keyfile needs a --keyfile path")?;
                Some(path)
            } else {
                None
            };

            let password = auth::read_new_password_with_confirmation(auth::PASSWORD_ENV)?;
            with_new_keyfile(generated, || ctx.clone().with_kdf(kdf).init(password))?;

            if !store_from_flag {
                config.storage_path = Some(ctx.store_path().to_path_buf());
                config.keyfile_path = ctx.keyfile().map(Path::to_path_buf);
                config.save_to(&config_path)?;
            }
            println!("store initialized at {}", ctx.store_path().display());
        }
        Commands::Add { name, address } => {
            let (user, host, port) = parse_address(&address)?;
            let mut store = ctx.load()?;
            if store.find(&name).is_some() {
                bail!(StoreError::DuplicateName(name));
            }

            let key = ctx.unlock(&store, auth::read_password()?)?;
            let secret = auth::read_secret(&format!("SSH password for {user}@{host}: "))?;
            store.add(ServerEntry::new(&name, &user, &host, port, &key, &secret)?)?;
            ctx.persist(&mut store)?;
            println!("server '{name}' added");
        }
        Commands::List => {
            let store = ctx.load()?;
            if store.is_empty() {
                println!("No servers stored.");
                return Ok(());
            }

            let name_width = store
                .names()
                .map(str::len)
                .chain(std::iter::once("Name".len()))
                .max()
                .unwrap_or_default();

            println!("{:<name_width$}  Address", "Name");
            println!("{:-<name_width$}  {:-<7}", "", "");
            for server in store.servers() {
                println!("{:<name_width$}  {}", server.name(), server.address());
            }
        }
        Commands::Remove { name, yes } => {
            let mut store = ctx.load()?;
            if store.find(&name).is_none() {
                bail!(StoreError::NotFound(name));
            }
            ctx.unlock(&store, auth::read_password()?)?;

            if !yes && !auth::confirm(&format!("Remove server '{name}'?"))? {
                println!("aborted");
                return Ok(());
            }
            store.remove(&name)?;
            ctx.persist(&mut store)?;
            println!("server '{name}' removed");
        }
        Commands::Rename { old, new } => {
            let mut store = ctx.load()?;
            store.rename(&old, &new)?;
            ctx.persist(&mut store)?;
            println!("server '{old}' renamed to '{new}'");
        }
        Commands::Edit {
            name,
            user,
            host,
            port,
            password,
        } => {
            if user.is_none() && host.is_none() && port.is_none() && !password {
                bail!("nothing to change; pass --user, --host, --port or --password");
            }
            let mut store = ctx.load()?;
            if store.find(&name).is_none() {
                bail!(StoreError::NotFound(name));
            }
            let key = ctx.unlock(&store, auth::read_password()?)?;

            let secret = if password {
                Some(auth::read_secret(&format!("New SSH password for '{name}': "))?)
            } else {
                None
            };
            let entry = store
                .find_mut(&name)
                .ok_or_else(|| StoreError::NotFound(name.clone()))?;
            if let Some(user) = &user {
                entry.set_user(user);
            }
            if let Some(host) = &host {
                entry.set_host(host);
            }
            if let Some(port) = port {
                entry.set_port(port);
            }
            if let Some(secret) = &secret {
                entry.set_secret(&key, secret)?;
            }
            ctx.persist(&mut store)?;
            println!("server '{name}' updated");
        }
        Commands::Passwd {
            new_keyfile,
            generate_keyfile,
            remove_keyfile,
        } => {
            let store = ctx.load()?;
            let old_key = ctx.unlock(&store, auth::read_password()?)?;

            let next_keyfile = match (remove_keyfile, new_keyfile) {
                (true, _) => None,
                (false, Some(path)) => Some(path),
                (false, None) => ctx.keyfile().map(Path::to_path_buf),
            };

            let password = auth::read_new_password_with_confirmation(auth::NEW_PASSWORD_ENV)?;
            let generated = next_keyfile.as_deref().filter(|_| generate_keyfile);
            with_new_keyfile(generated, || {
                let new = nestsh::key_material(password, next_keyfile.as_deref())?;
                ctx.change_password(&store, &old_key, &new)
            })?;
            println!("encryption password changed");

            if next_keyfile.as_deref() != ctx.keyfile() {
                if keyfile_from_flag || store_from_flag {
                    match &next_keyfile {
                        Some(path) => println!("use --keyfile {} from now on", path.display()),
                        None => println!("stop passing --keyfile from now on"),
                    }
                } else {
                    config.storage_path = Some(ctx.store_path().to_path_buf());
                    config.keyfile_path = next_keyfile;
                    config.save_to(&config_path)?;
                }
            }
        }
        Commands::Scp { src, dst } => {
            let transfer = Transfer::resolve(&src, &dst)?;
            let store = ctx.load()?;
            let entry = store
                .find(transfer.server())
                .ok_or_else(|| StoreError::NotFound(transfer.server().to_string()))?;
            let secret = {
                let key = ctx.unlock(&store, auth::read_password()?)?;
                entry.reveal(&key)?
            };

            match &transfer {
                Transfer::Upload { local, .. } => {
                    let size = std::fs::metadata(local)
                        .with_context(|| format!("cannot read {}", local.display()))?
                        .len();
                    let name = local.file_name().unwrap_or(local.as_os_str());
                    print!(
                        "Uploading {} ({})... ",
                        name.to_string_lossy(),
                        format_size(size)
                    );
                    std::io::stdout().flush()?;
                    transport::copy(&transfer, entry, &secret)?;
                    println!("done");
                }
                Transfer::Download { remote, .. } => {
                    print!("Downloading {remote}... ");
                    std::io::stdout().flush()?;
                    let size = transport::copy(&transfer, entry, &secret)?;
                    println!("done ({})", format_size(size));
                }
            }
        }
        Commands::Connect { name } => {
            let store = ctx.load()?;
            let entry = store
                .find(&name)
                .ok_or_else(|| StoreError::NotFound(name.clone()))?;
            let secret = {
                let key = ctx.unlock(&store, auth::read_password()?)?;
                entry.reveal(&key)?
            };

            let status = transport::interactive(entry, &secret)?;
            drop(secret);
            if !status.success() {
                std::process::exit(status.code().unwrap_or(1));
            }
        }
        Commands::Names => {
            for name in ctx.load()?.names() {
                println!("{name}");
            }
        }
    }

    Ok(())
}

/// Generates a keyfile at `path` (if given), then runs `op`. The keyfile is
/// removed again when `op` fails, so nothing is left that no store uses.
fn with_new_keyfile<T>(path: Option<&Path>, op: impl FnOnce() -> Result<T>) -> Result<T> {
    let Some(path) = path else {
        return op();
    };

    crypto::generate_keyfile(path)
        .with_context(|| format!("failed to create keyfile {}", path.display()))?;
    match op() {
        Ok(value) => {
            println!("keyfile written to {}", path.display());
            Ok(value)
        }
        Err(e) => {
            if let Err(rm) = std::fs::remove_file(path) {
                warn!(path = %path.display(), error = %rm, "could not remove unused keyfile");
            }
            Err(e)
        }
    }
}
