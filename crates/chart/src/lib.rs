//! Renders a cumulative-return series to a PNG for the dashboard.

use std::path::Path;

use chrono::{TimeZone, Utc};
use core_types::EquityPoint;
use plotters::prelude::*;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("nothing to render: the series is empty")]
    EmptySeries,
    // plotters' error types borrow the backend, so carry the message only.
    #[error("chart rendering failed: {0}")]
    Render(String),
}

pub type Result<T> = std::result::Result<T, Error>;

const CHART_SIZE: (u32, u32) = (1024, 512);

fn label_for(ms: i64) -> String {
    Utc.timestamp_millis_opt(ms)
        .single()
        .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| ms.to_string())
}

/// Draws the equity curve as a line series over time and writes it to
/// `path` as a PNG.
pub fn render_equity_curve(points: &[EquityPoint], path: &Path) -> Result<()> {
    if points.is_empty() {
        return Err(Error::EmptySeries);
    }

    let (x_min, x_max) = (
        points[0].open_time,
        points[points.len() - 1].open_time.max(points[0].open_time + 1),
    );
    let mut y_min = f64::MAX;
    let mut y_max = f64::MIN;
    for point in points {
        y_min = y_min.min(point.cumulative);
        y_max = y_max.max(point.cumulative);
    }
    // Pad the value axis so a flat series still has visible extent.
    let pad = ((y_max - y_min) * 0.05).max(0.01);
    let y_range = (y_min - pad)..(y_max + pad);

    let root = BitMapBackend::new(path, CHART_SIZE).into_drawing_area();
    root.fill(&WHITE).map_err(|e| Error::Render(e.to_string()))?;

    let mut chart = ChartBuilder::on(&root)
        .caption("Cumulative strategy return", ("sans-serif", 24))
        .margin(10)
        .x_label_area_size(40)
        .y_label_area_size(60)
        .build_cartesian_2d(x_min..x_max, y_range)
        .map_err(|e| Error::Render(e.to_string()))?;

    chart
        .configure_mesh()
        .x_labels(6)
        .x_label_formatter(&|ms| label_for(*ms))
        .y_desc("Cumulative return")
        .draw()
        .map_err(|e| Error::Render(e.to_string()))?;

    chart
        .draw_series(LineSeries::new(
            points.iter().map(|p| (p.open_time, p.cumulative)),
            &BLUE,
        ))
        .map_err(|e| Error::Render(e.to_string()))?
        .label("strategy")
        .legend(|(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], BLUE));

    chart
        .configure_series_labels()
        .border_style(&BLACK)
        .draw()
        .map_err(|e| Error::Render(e.to_string()))?;

    root.present().map_err(|e| Error::Render(e.to_string()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_a_png_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("equity.png");

        let points: Vec<EquityPoint> = (0..50)
            .map(|i| EquityPoint {
                open_time: 1_700_000_000_000 + i * 60_000,
                cumulative: 1.0 + (i as f64) * 0.001,
            })
            .collect();

        render_equity_curve(&points, &path).unwrap();
        let metadata = std::fs::metadata(&path).unwrap();
        assert!(metadata.len() > 0);
    }

    #[test]
    fn flat_series_still_renders() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("flat.png");

        let points: Vec<EquityPoint> = (0..10)
            .map(|i| EquityPoint {
                open_time: 1_700_000_000_000 + i * 60_000,
                cumulative: 1.0,
            })
            .collect();

        render_equity_curve(&points, &path).unwrap();
        assert!(path.exists());
    }

    #[test]
    fn empty_series_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.png");
        assert!(matches!(
            render_equity_curve(&[], &path),
            Err(Error::EmptySeries)
        ));
    }
}
