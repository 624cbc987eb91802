//! SVG Chart Generator for Training Curves
//!
//! Renders the per-epoch training history of a model as a standalone SVG line
//! chart: training/validation accuracy and training/validation loss against
//! the epoch index, with a titled legend.

use std::fs;
use std::path::Path;

use crate::training::history::TrainingHistory;

/// Chart styling constants
const CHART_WIDTH: f64 = 900.0;
const CHART_HEIGHT: f64 = 500.0;
const MARGIN_TOP: f64 = 60.0;
const MARGIN_RIGHT: f64 = 200.0;
const MARGIN_BOTTOM: f64 = 80.0;
const MARGIN_LEFT: f64 = 80.0;

const COLOR_PRIMARY: &str = "#3498db";
const COLOR_SECONDARY: &str = "#2ecc71";
const COLOR_TERTIARY: &str = "#e74c3c";
const COLOR_QUATERNARY: &str = "#f39c12";
const COLOR_GRID: &str = "#ecf0f1";
const COLOR_AXIS: &str = "#2c3e50";
const COLOR_TEXT: &str = "#2c3e50";

/// Maximum number of labelled ticks on the x axis
const MAX_X_TICKS: usize = 10;

/// A data point for a line chart
#[derive(Debug, Clone)]
pub struct DataPoint {
    pub x: f64,
    pub y: f64,
}

/// A data series for charts
#[derive(Debug, Clone)]
pub struct DataSeries {
    pub name: String,
    pub points: Vec<DataPoint>,
    pub color: String,
}

impl DataSeries {
    /// Series over epoch indices (1-based on the x axis)
    pub fn from_epochs(name: &str, values: &[f64], color: &str) -> Self {
        Self {
            name: name.to_string(),
            points: values
                .iter()
                .enumerate()
                .map(|(i, &y)| DataPoint {
                    x: (i + 1) as f64,
                    y,
                })
                .collect(),
            color: color.to_string(),
        }
    }
}

/// The four standard series of a training history
pub fn history_series(history: &TrainingHistory) -> Vec<DataSeries> {
    vec![
        DataSeries::from_epochs("Training Accuracy", &history.train_accuracy(), COLOR_PRIMARY),
        DataSeries::from_epochs("Validation Accuracy", &history.val_accuracy(), COLOR_SECONDARY),
        DataSeries::from_epochs("Training Loss", &history.train_loss(), COLOR_TERTIARY),
        DataSeries::from_epochs("Validation Loss", &history.val_loss(), COLOR_QUATERNARY),
    ]
}

/// Plot a training history to `output_path`
pub fn plot_history(
    title: &str,
    history: &TrainingHistory,
    output_path: &Path,
) -> std::io::Result<()> {
    let series = history_series(history);
    generate_line_chart(title, "Epoch", "Value", "Metrics", &series, output_path)
}

/// Generate a line chart SVG
pub fn generate_line_chart(
    title: &str,
    x_label: &str,
    y_label: &str,
    legend_title: &str,
    series: &[DataSeries],
    output_path: &Path,
) -> std::io::Result<()> {
    let svg = render_line_chart(title, x_label, y_label, legend_title, series);

    if let Some(parent) = output_path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(output_path, svg)
}

/// Render a line chart to an SVG string
pub fn render_line_chart(
    title: &str,
    x_label: &str,
    y_label: &str,
    legend_title: &str,
    series: &[DataSeries],
) -> String {
    let plot_width = CHART_WIDTH - MARGIN_LEFT - MARGIN_RIGHT;
    let plot_height = CHART_HEIGHT - MARGIN_TOP - MARGIN_BOTTOM;

    let (x_min, x_max, _, y_max) = find_ranges(series);
    // Accuracy lives in [0, 1]; losses may exceed it
    let y_min = 0.0;
    let y_max = if y_max.is_finite() { y_max.max(1.0) } else { 1.0 };
    let (x_min, x_max) = if x_min.is_finite() && x_max > x_min {
        (x_min, x_max)
    } else {
        (0.0, x_min.max(0.0) + 1.0)
    };

    let to_x = |x: f64| MARGIN_LEFT + ((x - x_min) / (x_max - x_min)) * plot_width;
    let to_y = |y: f64| MARGIN_TOP + plot_height - ((y - y_min) / (y_max - y_min)) * plot_height;

    let mut svg = String::new();

    svg.push_str(&format!(
        r#"<svg xmlns="http://www.w3.org/2000/svg" viewBox="0 0 {} {}" width="{}" height="{}">"#,
        CHART_WIDTH, CHART_HEIGHT, CHART_WIDTH, CHART_HEIGHT
    ));
    svg.push_str(&format!(
        r#"<rect width="{}" height="{}" fill="white"/>"#,
        CHART_WIDTH, CHART_HEIGHT
    ));

    // Title
    svg.push_str(&format!(
        r#"<text x="{}" y="35" text-anchor="middle" font-family="Arial, sans-serif" font-size="18" font-weight="bold" fill="{}">{}</text>"#,
        MARGIN_LEFT + plot_width / 2.0, COLOR_TEXT, escape_xml(title)
    ));

    // Horizontal grid lines with y labels
    for i in 0..=5 {
        let value = y_min + (i as f64 / 5.0) * (y_max - y_min);
        let y = to_y(value);

        svg.push_str(&format!(
            r#"<line x1="{}" y1="{}" x2="{}" y2="{}" stroke="{}" stroke-width="1"/>"#,
            MARGIN_LEFT, y, MARGIN_LEFT + plot_width, y, COLOR_GRID
        ));
        svg.push_str(&format!(
            r#"<text x="{}" y="{}" text-anchor="end" font-family="Arial, sans-serif" font-size="12" fill="{}">{:.2}</text>"#,
            MARGIN_LEFT - 10.0, y + 4.0, COLOR_TEXT, value
        ));
    }

    // Axes
    svg.push_str(&format!(
        r#"<line x1="{}" y1="{}" x2="{}" y2="{}" stroke="{}" stroke-width="2"/>"#,
        MARGIN_LEFT, MARGIN_TOP + plot_height, MARGIN_LEFT + plot_width, MARGIN_TOP + plot_height, COLOR_AXIS
    ));
    svg.push_str(&format!(
        r#"<line x1="{}" y1="{}" x2="{}" y2="{}" stroke="{}" stroke-width="2"/>"#,
        MARGIN_LEFT, MARGIN_TOP, MARGIN_LEFT, MARGIN_TOP + plot_height, COLOR_AXIS
    ));

    // Axis labels
    svg.push_str(&format!(
        r#"<text x="{}" y="{}" text-anchor="middle" font-family="Arial, sans-serif" font-size="14" fill="{}">{}</text>"#,
        MARGIN_LEFT + plot_width / 2.0, CHART_HEIGHT - 20.0, COLOR_TEXT, escape_xml(x_label)
    ));
    svg.push_str(&format!(
        r#"<text x="20" y="{}" text-anchor="middle" font-family="Arial, sans-serif" font-size="14" fill="{}" transform="rotate(-90 20 {})">{}</text>"#,
        MARGIN_TOP + plot_height / 2.0, COLOR_TEXT, MARGIN_TOP + plot_height / 2.0, escape_xml(y_label)
    ));

    // X-axis ticks, thinned for long histories
    let span = (x_max - x_min).max(1.0);
    let step = (span / MAX_X_TICKS as f64).ceil().max(1.0);
    let mut tick = x_min;
    while tick <= x_max + f64::EPSILON {
        svg.push_str(&format!(
            r#"<text x="{}" y="{}" text-anchor="middle" font-family="Arial, sans-serif" font-size="11" fill="{}">{:.0}</text>"#,
            to_x(tick), MARGIN_TOP + plot_height + 20.0, COLOR_TEXT, tick
        ));
        tick += step;
    }

    for series_data in series {
        if series_data.points.is_empty() {
            continue;
        }

        let path: Vec<String> = series_data
            .points
            .iter()
            .enumerate()
            .map(|(i, p)| {
                let cmd = if i == 0 { "M" } else { "L" };
                format!("{} {:.2} {:.2}", cmd, to_x(p.x), to_y(p.y))
            })
            .collect();

        svg.push_str(&format!(
            r#"<path d="{}" fill="none" stroke="{}" stroke-width="2"/>"#,
            path.join(" "),
            series_data.color
        ));
    }

    // Legend with heading
    let legend_x = CHART_WIDTH - MARGIN_RIGHT + 20.0;
    svg.push_str(&format!(
        r#"<text x="{}" y="{}" font-family="Arial, sans-serif" font-size="13" font-weight="bold" fill="{}">{}</text>"#,
        legend_x, MARGIN_TOP, COLOR_TEXT, escape_xml(legend_title)
    ));
    let mut legend_y = MARGIN_TOP + 15.0;
    for series_data in series {
        svg.push_str(&format!(
            r#"<rect x="{}" y="{}" width="15" height="15" fill="{}"/>"#,
            legend_x, legend_y, series_data.color
        ));
        svg.push_str(&format!(
            r#"<text x="{}" y="{}" font-family="Arial, sans-serif" font-size="12" fill="{}">{}</text>"#,
            legend_x + 20.0, legend_y + 12.0, COLOR_TEXT, escape_xml(&series_data.name)
        ));
        legend_y += 25.0;
    }

    svg.push_str("</svg>");
    svg
}

fn find_ranges(series: &[DataSeries]) -> (f64, f64, f64, f64) {
    let mut x_min = f64::INFINITY;
    let mut x_max = f64::NEG_INFINITY;
    let mut y_min = f64::INFINITY;
    let mut y_max = f64::NEG_INFINITY;

    for s in series {
        for p in &s.points {
            x_min = x_min.min(p.x);
            x_max = x_max.max(p.x);
            y_min = y_min.min(p.y);
            y_max = y_max.max(p.y);
        }
    }

    (x_min, x_max, y_min, y_max)
}

fn escape_xml(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::training::history::EpochRecord;
    use tempfile::TempDir;

    fn sample_history() -> TrainingHistory {
        let mut history = TrainingHistory::new();
        history.push(EpochRecord::new(0, 0.69, 0.50, 0.70, 0.48));
        history.push(EpochRecord::new(1, 0.55, 0.71, 0.60, 0.66));
        history.push(EpochRecord::new(2, 0.41, 0.83, 0.52, 0.75));
        history
    }

    #[test]
    fn test_history_chart_contains_all_series() {
        let svg = render_line_chart(
            "Student",
            "Epoch",
            "Value",
            "Metrics",
            &history_series(&sample_history()),
        );

        for name in [
            "Training Accuracy",
            "Validation Accuracy",
            "Training Loss",
            "Validation Loss",
            "Metrics",
        ] {
            assert!(svg.contains(name), "missing {}", name);
        }
        assert_eq!(svg.matches("<path").count(), 4);
    }

    #[test]
    fn test_single_epoch_chart_has_finite_coordinates() {
        let mut history = TrainingHistory::new();
        history.push(EpochRecord::new(0, 0.7, 0.5, 0.7, 0.5));

        let svg = render_line_chart("One", "Epoch", "Value", "Metrics", &history_series(&history));
        assert!(!svg.contains("NaN"));
        assert!(!svg.contains("inf"));
    }

    #[test]
    fn test_plot_history_writes_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("charts").join("teacher.svg");

        plot_history("Teacher <ResNet>", &sample_history(), &path).unwrap();

        let svg = std::fs::read_to_string(&path).unwrap();
        assert!(svg.starts_with("<svg"));
        assert!(svg.contains("Teacher &lt;ResNet&gt;"));
    }
}
