use clap::Parser;

use crate::fill::{Mask, Width};
use crate::schedule::Schedule;

fn parse_width(s: &str) -> Result<Width, String> {
    let raw: u64 = s
        .trim()
        .parse()
        .map_err(|_| format!("'{}' is not a number", s))?;
    Width::try_from(raw).map_err(|e| e.to_string())
}

fn parse_mask(s: &str) -> Result<Mask, String> {
    Mask::from_hex(s).map_err(|e| e.to_string())
}

fn parse_permissions(s: &str) -> Result<u32, String> {
    let trimmed = s.trim();
    let digits = trimmed.strip_prefix("0o").unwrap_or(trimmed);
    match u32::from_str_radix(digits, 8) {
        Ok(mode) if mode <= 0o777 => Ok(mode),
        _ => Err(format!("'{}' is not a valid octal permission value", s)),
    }
}

fn parse_size(s: &str) -> Result<usize, String> {
    match s.trim().parse::<usize>() {
        Ok(0) => Err("size must be greater than zero".to_string()),
        Ok(size) => Ok(size),
        Err(e) => Err(format!("'{}' is not a valid size: {}", s, e)),
    }
}

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Write random values to a shared memory.",
    long_about = None
)]
pub struct Cli {
    /// Name of the shared memory object
    #[arg(short, long)]
    pub name: String,

    /// Byte alignment of the generated random values (1, 2, 4 or 8)
    #[arg(short, long, default_value = "1", value_parser = parse_width)]
    pub alignment: Width,

    /// Bitmask (as hex value) that is applied to the generated random values
    #[arg(short, long, value_parser = parse_mask)]
    pub mask: Option<Mask>,

    /// Random value generation interval in milliseconds. 0 writes once
    #[arg(short, long, default_value_t = 1000)]
    pub interval: u64,

    /// Number of intervals to run. Runs until a termination signal if 0
    #[arg(short, long, default_value_t = 0)]
    pub limit: u64,

    /// Byte offset into the shared memory at which writing starts
    #[arg(short, long, default_value_t = 0)]
    pub offset: usize,

    /// Maximum number of elements to write
    #[arg(short, long)]
    pub elements: Option<usize>,

    /// Create the shared memory if it does not exist
    #[arg(short, long, requires = "size")]
    pub create: bool,

    /// Size in bytes of the shared memory to create
    #[arg(short, long, requires = "create", value_parser = parse_size)]
    pub size: Option<usize>,

    /// Octal permissions of created shared memory and semaphore
    #[arg(short, long, default_value = "0660", value_parser = parse_permissions)]
    pub permissions: u32,

    /// Fail if the shared memory (or semaphore) already exists
    #[arg(short = 'x', long, requires = "create")]
    pub exclusive: bool,

    /// Do not remove created objects on exit
    #[arg(long, requires = "create")]
    pub keep: bool,

    /// Name of a semaphore that guards each write
    #[arg(long)]
    pub semaphore: Option<String>,

    /// Enable debug output
    #[arg(short, long)]
    pub verbose: bool,
}

impl Cli {
    pub fn into_config(self) -> Config {
        let create = match (self.create, self.size) {
            (true, Some(size)) => Some(Create {
                size,
                mode: self.permissions,
                exclusive: self.exclusive,
                keep: self.keep,
            }),
            _ => None,
        };
        Config {
            name: self.name,
            width: self.alignment,
            mask: self.mask.unwrap_or_default(),
            schedule: Schedule::from_millis(self.interval, self.limit),
            offset: self.offset,
            max_elements: self.elements,
            create,
            semaphore: self.semaphore,
        }
    }
}

/// How to create missing objects.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Create {
    pub size: usize,
    pub mode: u32,
    pub exclusive: bool,
    pub keep: bool,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Config {
    pub name: String,
    pub width: Width,
    pub mask: Mask,
    pub schedule: Schedule,
    pub offset: usize,
    pub max_elements: Option<usize>,
    /// `None` opens an existing segment (and semaphore).
    pub create: Option<Create>,
    pub semaphore: Option<String>,
}

impl Config {
    pub fn new(name: impl Into<String>) -> Self {
        Config {
            name: name.into(),
            width: Width::default(),
            mask: Mask::default(),
            schedule: Schedule::default(),
            offset: 0,
            max_elements: None,
            create: None,
            semaphore: None,
        }
    }
}
