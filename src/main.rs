use std::{
    fs,
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::{Context, Result, anyhow, bail};
use pose_match::{
    InferenceWorker, PipelineConfig, PoseDocument, PoseService, ScoreReport, TargetCatalog,
    catalog::{load_pose_document, load_pose_file},
    diff::diff_documents,
    pipeline::{draw_pose, load_frame},
    similarity::{AngleKind, JointAngles, directional_percent, parse_angle_list},
    types::Pose,
};

const USAGE: &str = "usage:
  pose-match infer <image> [out.json] [out.png]
  pose-match score <image> <target> [angle,angle,...]
  pose-match compare <a.json> <b.json> [angle,angle,...]   (one-way, no mirroring)
  pose-match diff <ours.json> <reference.json>
  pose-match targets";

fn main() -> Result<()> {
    env_logger::init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let cfg = PipelineConfig::from_env();
    match args.iter().map(String::as_str).collect::<Vec<_>>().as_slice() {
        ["infer", image, rest @ ..] => infer(&cfg, Path::new(image), rest),
        ["score", image, target, rest @ ..] => score(&cfg, Path::new(image), target, rest.first()),
        ["compare", a, b, rest @ ..] => compare(Path::new(a), Path::new(b), rest.first()),
        ["diff", a, b] => diff(Path::new(a), Path::new(b)),
        ["targets"] => list_targets(&cfg),
        _ => bail!("{USAGE}"),
    }
}

fn start_worker(cfg: &PipelineConfig) -> Result<InferenceWorker> {
    let service = PoseService::from_config(cfg).context("failed to start pose pipeline")?;
    Ok(InferenceWorker::start(Arc::new(service)))
}

fn selected_angles(arg: Option<&&str>) -> Vec<AngleKind> {
    arg.map(|s| parse_angle_list(s))
        .unwrap_or_else(|| AngleKind::ALL.to_vec())
}

fn infer(cfg: &PipelineConfig, image: &Path, outputs: &[&str]) -> Result<()> {
    let worker = start_worker(cfg)?;
    let pose = worker.infer_timeout(image, cfg.infer_timeout)?;

    let out_json = outputs
        .first()
        .map(PathBuf::from)
        .unwrap_or_else(|| sibling(image, "_landmarks.json"));
    let out_png = outputs
        .get(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| sibling(image, "_annotated.png"));

    if pose.is_empty() {
        println!("No person detected in {}", image.display());
    } else {
        print_angles(&pose);
    }

    let doc = PoseDocument::from_pose(&pose);
    fs::write(&out_json, serde_json::to_string_pretty(&doc)?)
        .with_context(|| format!("failed to write {}", out_json.display()))?;
    save_overlay(image, &pose, &out_png)?;
    println!("Saved: {}\nSaved: {}", out_png.display(), out_json.display());
    Ok(())
}

fn score(cfg: &PipelineConfig, image: &Path, target: &str, angles: Option<&&str>) -> Result<()> {
    let catalog = TargetCatalog::load(&cfg.targets_dir)?;
    let target = catalog.get(target)?;
    let angles = selected_angles(angles);

    let worker = start_worker(cfg)?;
    let pose = worker.infer_timeout(image, cfg.infer_timeout)?;
    let report = ScoreReport::new(&pose, target, &angles);
    if !report.body_found {
        log::info!("no person in {}", image.display());
    }
    println!("{}", serde_json::to_string(&report)?);
    Ok(())
}

fn compare(a: &Path, b: &Path, angles: Option<&&str>) -> Result<()> {
    let origin = JointAngles::from_pose(&load_pose_file(a)?);
    let target = JointAngles::from_pose(&load_pose_file(b)?);
    let percent = directional_percent(&origin, &target, &selected_angles(angles));
    println!("Similarity (squared): {:.4}", percent / 100.0);
    println!("Similarity percent: {percent:.2}%");
    Ok(())
}

fn diff(ours: &Path, reference: &Path) -> Result<()> {
    let report = diff_documents(&load_pose_document(ours)?, &load_pose_document(reference)?)?;

    println!("Top-10 XY errors:");
    for e in report.errors.iter().take(10) {
        println!("{:18} err={:7.2} (dx={:7.2}, dy={:7.2})", e.name, e.error, e.dx, e.dy);
    }
    let xy = report.xy;
    println!(
        "XY error: mean={:.2} median={:.2} max={:.2}",
        xy.mean, xy.median, xy.max
    );
    for (region, s) in &report.regions {
        println!("{region:6} mean={:.2} median={:.2} max={:.2}", s.mean, s.median, s.max);
    }

    let z = report.depth;
    let corr = z.correlation.map_or_else(|| "n/a".to_string(), |c| format!("{c:.3}"));
    println!(
        "Z: ref = {:.3} * ours + {:.3}, RMSE={:.3}, corr={corr}",
        z.slope, z.intercept, z.rmse
    );

    let al = &report.alignment;
    println!(
        "Best-fit similarity: scale={:.4}, rot={:.2} deg, residual mean={:.2} median={:.2} max={:.2}",
        al.scale, al.rotation_deg, al.stats.mean, al.stats.median, al.stats.max
    );
    for (name, res) in al.residuals.iter().take(10) {
        println!("{name:18} res={res:7.2}");
    }
    Ok(())
}

fn list_targets(cfg: &PipelineConfig) -> Result<()> {
    let catalog = TargetCatalog::load(&cfg.targets_dir)?;
    if catalog.is_empty() {
        println!("No targets in {}", cfg.targets_dir.display());
    }
    for name in catalog.list() {
        println!("{name}");
    }
    Ok(())
}

fn print_angles(pose: &Pose) {
    for (kind, angle) in JointAngles::from_pose(pose).iter() {
        match angle {
            Some(deg) => println!("{:>20}: {deg:6.1}°", kind.name()),
            None => println!("{:>20}:      -", kind.name()),
        }
    }
}

fn save_overlay(image: &Path, pose: &Pose, out: &Path) -> Result<()> {
    let mut frame = load_frame(image)?;
    draw_pose(&mut frame, pose);
    image::RgbImage::from_raw(frame.width, frame.height, frame.rgb)
        .ok_or_else(|| anyhow!("annotated frame has the wrong size"))?
        .save(out)
        .with_context(|| format!("failed to write {}", out.display()))
}

/// `photo.jpg` + `_landmarks.json` -> `photo_landmarks.json` next to it.
fn sibling(image: &Path, suffix: &str) -> PathBuf {
    let stem = image
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "image".to_string());
    image.with_file_name(format!("{stem}{suffix}"))
}
