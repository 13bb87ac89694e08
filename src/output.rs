use std::fs;
use std::path::Path;
use csv::Writer;

use crate::capillary::LayerInfo;
use crate::errors::Result;
use crate::image_io::ensure_folder;
use crate::units::Units;

/// Write the described capillaries of one layer to `Layer<N>/Data.csv`.
///
/// x and y are absolute positions in mm followed by the pixel position in
/// the stitched layer.
pub fn write_layer_data<P: AsRef<Path>>(
    layer_info: &LayerInfo,
    units: &Units,
    start_mm: (f32, f32),
    output_dir: P,
) -> Result<()> {
    let layer_dir = output_dir
        .as_ref()
        .join(format!("Layer{}", layer_info.layer_index + 1));
    ensure_folder(&layer_dir)?;

    let mut writer = Writer::from_path(layer_dir.join("Data.csv"))?;

    // Write header
    writer.write_record(["Num", "x (col)", "y (row)", "z", "Angle rad", "Contrast", "Score"])?;

    // Write data
    for capillary in &layer_info.capillaries {
        let apex = capillary.apex;
        writer.write_record(&[
            (capillary.index + 1).to_string(),
            format!("{:.4} ({})", apex.x + start_mm.0, units.mm_to_pixels(apex.x)),
            format!("{:.4} ({})", apex.y + start_mm.1, units.mm_to_pixels(apex.y)),
            format!("{:.4}", apex.z),
            format!("{:.2}", capillary.angle),
            capillary.contrast().to_string(),
            format!("{:.2}", capillary.score),
        ])?;
    }

    writer.flush()?;

    Ok(())
}

/// Write per-layer apex statistics of the detection pass to
/// `Capillaries/AllLayers.csv`
pub fn write_all_layers<P: AsRef<Path>>(layer_infos: &[LayerInfo], output_dir: P) -> Result<()> {
    write_layer_scores(
        layer_infos,
        output_dir.as_ref(),
        "AllLayers.csv",
        "Corners",
        |layer_info| layer_info.capillary_apexes.len(),
    )
}

/// Write per-layer frame statistics of the description pass to
/// `Capillaries/ActualLayersFrames.csv`
pub fn write_actual_layers_frames<P: AsRef<Path>>(
    layer_infos: &[LayerInfo],
    output_dir: P,
) -> Result<()> {
    write_layer_scores(
        layer_infos,
        output_dir.as_ref(),
        "ActualLayersFrames.csv",
        "Frames",
        |layer_info| layer_info.capillaries.len(),
    )
}

fn write_layer_scores(
    layer_infos: &[LayerInfo],
    output_dir: &Path,
    filename: &str,
    count_header: &str,
    count: impl Fn(&LayerInfo) -> usize,
) -> Result<()> {
    let capillaries_dir = output_dir.join("Capillaries");
    ensure_folder(&capillaries_dir)?;

    let mut writer = Writer::from_path(capillaries_dir.join(filename))?;
    writer.write_record(["Layer", count_header, "Max score", "Sum score"])?;

    for layer_info in layer_infos {
        writer.write_record(&[
            (layer_info.layer_index + 1).to_string(),
            count(layer_info).to_string(),
            format!("{:.1}", layer_info.max_score),
            format!("{:.1}", layer_info.sum_score),
        ])?;
    }

    writer.flush()?;

    Ok(())
}

/// Write `Summary.txt` naming the best layer (1-based)
pub fn write_summary<P: AsRef<Path>>(best_layer: Option<usize>, output_dir: P) -> Result<()> {
    ensure_folder(output_dir.as_ref())?;

    let best = best_layer.map_or_else(|| "none".to_string(), |index| (index + 1).to_string());
    fs::write(
        output_dir.as_ref().join("Summary.txt"),
        format!("Best layer: {}\n", best),
    )?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capillary::{CapillaryInfo, ScoredCorner};
    use crate::units::Point3D;
    use std::path::PathBuf;

    fn temp_dir(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("capillary_map_output_{}_{}", name, std::process::id()))
    }

    #[test]
    fn layer_data_uses_absolute_mm_and_pixels() {
        let dir = temp_dir("data");
        let units = Units::new(100.0);

        let mut layer_info = LayerInfo::new(2, 0.25);
        layer_info.capillaries.push(CapillaryInfo {
            pixels_capillary: 4,
            energy_capillary: 160,
            pixels_surroundings: 10,
            energy_surroundings: 1500,
            angle: 0.872_664_6,
            score: 1.126,
            ..CapillaryInfo::new(4, Point3D::new(1.5, 0.25, 0.25))
        });

        write_layer_data(&layer_info, &units, (10.0, 20.0), &dir).unwrap();

        let content = fs::read_to_string(dir.join("Layer3").join("Data.csv")).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines[0], "Num,x (col),y (row),z,Angle rad,Contrast,Score");
        assert_eq!(lines[1], "5,11.5000 (150),20.2500 (25),0.2500,0.87,110,1.13");

        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn layer_scores_and_summary_are_one_based() {
        let dir = temp_dir("scores");

        let mut first = LayerInfo::new(0, 0.1);
        first.capillary_apexes = vec![ScoredCorner::new(Point3D::default(), 3.0, 50); 2];
        first.max_score = 3.0;
        first.sum_score = 6.0;
        let second = LayerInfo::new(1, 0.2);

        write_all_layers(&[first.clone(), second.clone()], &dir).unwrap();
        write_actual_layers_frames(&[first, second], &dir).unwrap();
        write_summary(Some(0), &dir).unwrap();

        let all = fs::read_to_string(dir.join("Capillaries").join("AllLayers.csv")).unwrap();
        assert_eq!(all, "Layer,Corners,Max score,Sum score\n1,2,3.0,6.0\n2,0,0.0,0.0\n");

        let frames =
            fs::read_to_string(dir.join("Capillaries").join("ActualLayersFrames.csv")).unwrap();
        assert!(frames.starts_with("Layer,Frames,Max score,Sum score\n1,0,3.0,6.0\n"));

        let summary = fs::read_to_string(dir.join("Summary.txt")).unwrap();
        assert_eq!(summary, "Best layer: 1\n");

        write_summary(None, &dir).unwrap();
        let summary = fs::read_to_string(dir.join("Summary.txt")).unwrap();
        assert_eq!(summary, "Best layer: none\n");

        fs::remove_dir_all(&dir).ok();
    }
}
