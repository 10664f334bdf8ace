#![cfg(not(tarpaulin_include))]
use crate::error::{AppError, AppResult};
use crate::farm_report::FarmReport;
use plotters::prelude::*;
use serde::Serialize;

/// Configuration options for chart generation
#[derive(Clone, Debug)]
pub struct GraphOptions {
    /// Title displayed at the top of the chart
    pub title: String,

    /// Label for the X-axis
    pub x_label: String,

    /// Label for the Y-axis
    pub y_label: String,

    /// Width of the chart in pixels
    pub width: u32,

    /// Height of the chart in pixels
    pub height: u32,
}

impl Default for GraphOptions {
    fn default() -> Self {
        Self {
            title: "Pest and disease trend".to_string(),
            x_label: "Week".to_string(),
            y_label: "Rate".to_string(),
            width: 800,
            height: 600,
        }
    }
}

/// One report placed on the trend chart
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrendPoint {
    pub week: i64,
    pub pest_rate: f64,
    pub disease_rate: f64,
}

/// Chart points for reports already ordered by week
///
/// Reports whose week range cannot be parsed have no place on the axis and are skipped.
pub fn trend_points(reports: &[FarmReport]) -> Vec<TrendPoint> {
    reports
        .iter()
        .filter_map(|report| {
            report.weeks().map(|(start, _)| TrendPoint {
                week: start,
                pest_rate: report.pest_rate,
                disease_rate: report.disease_rate,
            })
        })
        .collect()
}

/// Render pest and disease rate by week as a PNG
///
/// # Returns
/// * The PNG image bytes
///
/// # Implementation Notes
/// * Draws into a temporary file which is removed before returning
/// * Pest rate is drawn in red, disease rate in blue
pub fn create_trend_graph(points: &[TrendPoint], options: &GraphOptions) -> AppResult<Vec<u8>> {
    let staged = tempfile::Builder::new()
        .prefix("trend-")
        .suffix(".png")
        .tempfile()?;

    draw_trend(points, options, staged.path())
        .map_err(|e| AppError::Chart(e.to_string()))?;

    Ok(std::fs::read(staged.path())?)
}

fn draw_trend(
    points: &[TrendPoint],
    options: &GraphOptions,
    path: &std::path::Path,
) -> Result<(), Box<dyn std::error::Error>> {
    let root = BitMapBackend::new(path, (options.width, options.height)).into_drawing_area();
    root.fill(&WHITE)?;

    let min_x = points.iter().map(|p| p.week).min().unwrap_or(0);
    let max_x = points.iter().map(|p| p.week).max().unwrap_or(1);
    let max_y = points
        .iter()
        .map(|p| p.pest_rate.max(p.disease_rate))
        .fold(0.0_f64, f64::max);

    let x_range = min_x as f64..max_x as f64 + 1.0;
    let y_range = 0.0..max_y + 1.0;

    let mut chart = ChartBuilder::on(&root)
        .caption(&options.title, ("sans-serif", 30).into_font())
        .margin(10)
        .x_label_area_size(30)
        .y_label_area_size(40)
        .build_cartesian_2d(x_range, y_range)?;

    chart
        .configure_mesh()
        .x_desc(&options.x_label)
        .y_desc(&options.y_label)
        .draw()?;

    chart
        .draw_series(LineSeries::new(
            points.iter().map(|p| (p.week as f64, p.pest_rate)),
            &RED,
        ))?
        .label("Pest rate")
        .legend(|(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], &RED));

    chart
        .draw_series(LineSeries::new(
            points.iter().map(|p| (p.week as f64, p.disease_rate)),
            &BLUE,
        ))?
        .label("Disease rate")
        .legend(|(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], &BLUE));

    chart
        .configure_series_labels()
        .background_style(WHITE.mix(0.8))
        .border_style(&BLACK)
        .draw()?;

    root.present()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn points_skip_unparsable_weeks() {
        let reports = vec![
            FarmReport {
                id: 1,
                week_range: "1-3".into(),
                pest_rate: 2.0,
                ..Default::default()
            },
            FarmReport {
                id: 2,
                week_range: "??".into(),
                pest_rate: 9.0,
                ..Default::default()
            },
            FarmReport {
                id: 3,
                week_range: "5".into(),
                disease_rate: 1.5,
                ..Default::default()
            },
        ];

        assert_eq!(
            trend_points(&reports),
            vec![
                TrendPoint {
                    week: 1,
                    pest_rate: 2.0,
                    disease_rate: 0.0
                },
                TrendPoint {
                    week: 5,
                    pest_rate: 0.0,
                    disease_rate: 1.5
                },
            ]
        );
    }
}
