/// Browse a FAT disk image
/// Usage: fat-browser --image FILENAME [--list PATH] [--print PATH]
///
use std::process::exit;

use clap::Parser;
use config::Config;
use env_logger;
use log::{error, info};

use fat_volume::device::ImageFile;
use fat_volume::volume::Volumes;

/// Command line arguments to browse a disk image
#[derive(Parser, Debug)]
#[clap(about, version, author)]
struct Args {
    /// Disk image to mount
    #[clap(short, long)]
    image: String,

    /// MBR partition index to mount, ignored for raw volumes
    #[clap(short, long, default_value_t = 0)]
    partition: u8,

    /// Drive letter to mount the image as
    #[clap(short, long, default_value_t = 'C')]
    drive: char,

    /// List the entries of a directory, e.g. C:/ or C:/DIR1
    #[clap(short, long)]
    list: Option<String>,

    /// Print a file's contents line by line
    #[clap(long)]
    print: Option<String>,

    /// Verbose mode prints the mount geometry
    #[clap(short, long)]
    verbose: bool,
}

/// Browse a disk image
fn main() {
    let mut _debug = true;

    // Initialize logger
    if let Err(e) = env_logger::try_init() {
        panic!("couldn't initialize logger: {:?}", e);
    }

    let settings_result = load_settings("config/fat-volume.toml");
    match settings_result {
        Ok(settings) => {
            info!("merged in config");
            if let Ok(b) = settings.get_bool("debug") {
                _debug = b;
            }
        }
        Err(s) => {
            error!("error loading config: {:?}", s)
        }
    };

    // Parse command line arguments
    let args = Args::parse();

    fat_volume::init();

    let device = match ImageFile::open(&args.image) {
        Ok(device) => device,
        Err(e) => {
            error!("couldn't open image {}: {}", args.image, e);
            exit(1);
        }
    };

    let mut volumes = Volumes::new();
    if let Err(e) = volumes.mount(args.drive, Box::new(device), args.partition) {
        error!("couldn't mount {}: {}", args.image, e);
        exit(1);
    }
    if let Err(e) = volumes.set_default_drive(args.drive) {
        error!("{}", e);
        exit(1);
    }

    if args.verbose {
        info!("mounted {} as drive {}", args.image, args.drive);
    }

    if let Some(path) = &args.list {
        if let Err(e) = list_directory(&mut volumes, path) {
            error!("couldn't list {}: {}", path, e);
            exit(1);
        }
    }

    if let Some(path) = &args.print {
        if let Err(e) = print_file(&mut volumes, path) {
            error!("couldn't print {}: {}", path, e);
            exit(1);
        }
    }

    exit(0);
}

/// List every entry of a directory in long form
fn list_directory(volumes: &mut Volumes, path: &str) -> Result<(), fat_volume::error::FatError> {
    let folder = volumes.open_folder(path)?;
    println!("{}", volumes.folder_path(folder)?);

    while let Some(item) = volumes.next_item(folder)? {
        println!("{}", volumes.describe(item)?);
        volumes.close(item)?;
    }

    volumes.close_folder(folder)
}

/// Print a file line by line
fn print_file(volumes: &mut Volumes, path: &str) -> Result<(), fat_volume::error::FatError> {
    let file = volumes.open(path, "r")?;

    while let Some(line) = volumes.read_line(file)? {
        println!("{}", line);
    }

    volumes.close(file)
}

/// load settings from a config file
/// returns the config settings as a Config on success, or a ConfigError on failure
fn load_settings(config_name: &str) -> Result<Config, config::ConfigError> {
    Config::builder()
        // Add in config file
        .add_source(config::File::with_name(config_name))
        // Add in settings from the environment (with a prefix of APP)
        // E.g. `APP_DEBUG=1 ./target/fat-browser` would set the `debug` key
        .add_source(config::Environment::with_prefix("APP"))
        .build()
}
