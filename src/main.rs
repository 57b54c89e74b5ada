use std::{
    env,
    ffi::OsString,
    path::{Path, PathBuf},
    process::ExitCode,
};

use extract_pose::config::PoseConfig;
use extract_pose::pose::{self, BlazePose};
use extract_pose::PoseError;

fn main() -> ExitCode {
    let mut args = env::args_os();
    let program = args.next();
    let (Some(image_path), None) = (args.next(), args.next()) else {
        eprintln!("Usage: {} <image_path>", program_name(program));
        return ExitCode::FAILURE;
    };

    extract_pose::init_logger!();

    match run(PathBuf::from(image_path)) {
        Ok(json) => {
            println!("{json}");
            ExitCode::SUCCESS
        }
        Err(err) => {
            if let Some(source) = std::error::Error::source(&err) {
                log::debug!("caused by: {source:#}");
            }
            eprintln!("Error: {err:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(image_path: PathBuf) -> Result<String, PoseError> {
    let config = PoseConfig::from_env()?;
    // Unreadable inputs are reported without touching the model files.
    let image = pose::load_image(&image_path, config.jpeg_backend)?;

    let mut model = BlazePose::load(&config)?;
    let keypoints = pose::detect_keypoints(&image, &mut model)?;
    log::debug!("extracted {} keypoints", keypoints.len());

    pose::to_json(&keypoints).map_err(|e| PoseError::Model(e.into()))
}

fn program_name(arg0: Option<OsString>) -> String {
    arg0.as_deref()
        .map(Path::new)
        .and_then(Path::file_name)
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| env!("CARGO_BIN_NAME").to_string())
}
