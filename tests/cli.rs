use std::{
    ffi::OsStr,
    io::Cursor,
    path::Path,
    process::{Command, Output},
};

const CONFIG_VARS: &[&str] = &[
    "RUST_LOG",
    "POSE_MODEL_DIR",
    "POSE_MODEL_COMPLEXITY",
    "POSE_MIN_DETECTION_CONFIDENCE",
    "POSE_JPEG_BACKEND",
];

fn run(args: &[&Path], env: &[(&str, &OsStr)]) -> Output {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_extract-pose"));
    cmd.args(args);
    for var in CONFIG_VARS {
        cmd.env_remove(var);
    }
    cmd.envs(env.iter().copied());
    cmd.output().unwrap()
}

fn extract_pose(args: &[&Path], model_dir: Option<&Path>) -> Output {
    match model_dir {
        Some(dir) => run(args, &[("POSE_MODEL_DIR", dir.as_os_str())]),
        None => run(args, &[]),
    }
}

fn write_image(path: &Path, format: image::ImageOutputFormat) {
    let mut data = Cursor::new(Vec::new());
    image::DynamicImage::ImageRgb8(image::RgbImage::new(8, 8))
        .write_to(&mut data, format)
        .unwrap();
    std::fs::write(path, data.into_inner()).unwrap();
}

fn stderr(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).into_owned()
}

fn assert_usage(output: &Output) {
    assert_eq!(output.status.code(), Some(1));
    assert!(output.stdout.is_empty());
    let stderr = stderr(output);
    assert!(stderr.starts_with("Usage: "), "{stderr}");
    assert!(stderr.trim_end().ends_with(" <image_path>"), "{stderr}");
}

#[test]
fn no_arguments() {
    assert_usage(&extract_pose(&[], None));
}

#[test]
fn too_many_arguments() {
    let output = extract_pose(&[Path::new("a.jpg"), Path::new("b.jpg")], None);
    assert_usage(&output);
}

#[test]
fn missing_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("missing.jpg");

    let output = extract_pose(&[path.as_path()], None);
    assert_eq!(output.status.code(), Some(1));
    assert!(output.stdout.is_empty());
    assert_eq!(
        stderr(&output).trim_end(),
        format!("Error: Could not read image from {}", path.display())
    );
}

#[test]
fn undecodable_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("person.jpg");
    std::fs::write(&path, b"GIF89a, or maybe not").unwrap();

    let output = extract_pose(&[path.as_path()], None);
    assert_eq!(output.status.code(), Some(1));
    assert!(output.stdout.is_empty());
    assert_eq!(
        stderr(&output).trim_end(),
        format!("Error: Could not read image from {}", path.display())
    );
}

#[test]
fn missing_models() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("person.png");
    write_image(&path, image::ImageOutputFormat::Png);

    let output = extract_pose(&[path.as_path()], Some(dir.path()));
    assert_eq!(output.status.code(), Some(1));
    assert!(output.stdout.is_empty());
    let stderr = stderr(&output);
    assert!(stderr.starts_with("Error: "), "{stderr}");
    assert!(stderr.contains("pose_detection.onnx"), "{stderr}");
    assert_eq!(stderr.lines().count(), 1, "{stderr}");
}

#[test]
fn invalid_jpeg_backend() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("person.jpg");
    write_image(&path, image::ImageOutputFormat::Jpeg(90));

    let output = run(
        &[path.as_path()],
        &[
            ("POSE_JPEG_BACKEND", OsStr::new("bogus")),
            ("POSE_MODEL_DIR", dir.path().as_os_str()),
        ],
    );
    assert_eq!(output.status.code(), Some(1));
    assert!(output.stdout.is_empty());
    let stderr = stderr(&output);
    assert!(stderr.starts_with("Error: "), "{stderr}");
    assert!(stderr.contains("POSE_JPEG_BACKEND"), "{stderr}");
    assert!(stderr.contains("bogus"), "{stderr}");
    assert!(!stderr.contains("Could not read image"), "{stderr}");
    assert_eq!(stderr.lines().count(), 1, "{stderr}");
}

#[test]
fn zune_jpeg_backend_decodes() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("person.jpg");
    write_image(&path, image::ImageOutputFormat::Jpeg(90));

    // The image decodes, so the run only fails once it looks for the networks.
    let output = run(
        &[path.as_path()],
        &[
            ("POSE_JPEG_BACKEND", OsStr::new("zune-jpeg")),
            ("POSE_MODEL_DIR", dir.path().as_os_str()),
        ],
    );
    assert_eq!(output.status.code(), Some(1));
    let stderr = stderr(&output);
    assert!(stderr.contains("pose_detection.onnx"), "{stderr}");
}
