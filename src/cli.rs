//! Command line: `vcam <-v|-i> <media_path> [loop: 0|1] [-d]`

use std::ffi::OsString;
use std::path::PathBuf;

use thiserror::Error;

use crate::utils::MediaKind;

/// Parsed invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Args {
    pub kind: MediaKind,
    pub path: PathBuf,
    pub looping: bool,
    pub detailed: bool,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ArgsError {
    #[error("expected 2 to 4 arguments, got {0}")]
    Count(usize),
    #[error("invalid input type '{0}', use -v or -i")]
    InvalidMode(String),
    #[error("missing media path")]
    MissingPath,
    #[error("invalid loop argument '{0}', use 0/false or 1/true")]
    InvalidLoop(String),
    #[error("unexpected argument '{0}'")]
    Unexpected(String),
    #[error("arguments must be valid UTF-8")]
    NotUnicode,
}

/// Parse a full argv, program name included
pub fn parse<I>(argv: I) -> Result<Args, ArgsError>
where
    I: IntoIterator<Item = OsString>,
{
    let mut argv: Vec<OsString> = argv.into_iter().collect();
    if !(3..=5).contains(&argv.len()) {
        return Err(ArgsError::Count(argv.len().saturating_sub(1)));
    }
    argv.remove(0);

    let mut pargs = pico_args::Arguments::from_vec(argv);
    let detailed = pargs.contains("-d");

    let mut free = pargs
        .finish()
        .into_iter()
        .map(|arg| arg.into_string().map_err(|_| ArgsError::NotUnicode));

    let mode = free.next().ok_or(ArgsError::MissingPath)??;
    let kind = MediaKind::from_flag(&mode).ok_or(ArgsError::InvalidMode(mode))?;
    let path = PathBuf::from(free.next().ok_or(ArgsError::MissingPath)??);

    let looping = match free.next().transpose()? {
        Some(token) => parse_loop(&token)?,
        None => false,
    };

    if let Some(extra) = free.next().transpose()? {
        return Err(ArgsError::Unexpected(extra));
    }

    Ok(Args {
        kind,
        path,
        looping,
        detailed,
    })
}

fn parse_loop(token: &str) -> Result<bool, ArgsError> {
    match token.to_ascii_lowercase().as_str() {
        "1" | "true" => Ok(true),
        "0" | "false" => Ok(false),
        _ => Err(ArgsError::InvalidLoop(token.to_string())),
    }
}

pub fn usage(program: &str) -> String {
    format!(
        "Usage: {program} <-v/-i> <media_path> [loop: 0 or 1] [-d]\n\
         Arguments:\n  \
           -v:           Specify video input.\n  \
           -i:           Specify image input.\n  \
           <media_path>: The path to the input directory or file.\n  \
           <loop>:       Whether to loop indefinitely. 0 for false, 1 for true.\n  \
           -d:           Enable detailed logging.\n\
         \n\
         Example:\n  \
           {program} -v /path/to/video/video.mp4\n  \
           {program} -i /path/to/image\n"
    )
}
