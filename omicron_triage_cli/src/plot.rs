use std::fs;
use std::ops::Range;
use std::panic;
use std::path::Path;

use anyhow::{Context, Result};
use omicron_triage::{
    derive_tiers, elapsed_label, quality_axis, select, time_ticks, Params, Query, TriggerTable,
};
use plotters::coord::ranged1d::{DefaultFormatting, KeyPointHint, Ranged};
use plotters::coord::types::RangedCoordf64;
use plotters::prelude::*;
use plotters::style::{FontDesc, FontFamily, FontStyle};
use plotters_backend::{
    BackendColor, BackendCoord, BackendTextStyle, DrawingBackend, DrawingErrorKind,
};

/// Renders the tiered trigger plot, turning backend panics into errors.
pub fn render_chart_guard(
    table: &TriggerTable,
    query: &Query,
    params: &Params,
    path: &Path,
) -> Result<(), String> {
    let render = || -> Result<(), String> {
        render_triggers(table, query, params, path)
            .map_err(|e| format!("plotting error: {:#}", e))
    };

    panic::catch_unwind(panic::AssertUnwindSafe(render))
        .map_err(|_| "plotting backend panicked".to_string())?
}

fn render_triggers(
    table: &TriggerTable,
    query: &Query,
    params: &Params,
    path: &Path,
) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let backend = BitMapBackend::new(path, (params.image_width, params.image_height));
    let root = TextTolerantBackend::new(backend).into_drawing_area();
    draw_triggers(root, table, query, params)
}

fn draw_triggers<DB>(
    root: DrawingArea<DB, plotters::coord::Shift>,
    table: &TriggerTable,
    query: &Query,
    params: &Params,
) -> Result<()>
where
    DB: DrawingBackend,
    DB::ErrorType: 'static,
{
    let start = query.window_start();
    let end = query.window_end();
    let tiers = derive_tiers(query.min_snr(), params);
    let lowest = tiers.first().map(|t| select(table, t)).unwrap_or_default();
    let (y_min, y_max) = quality_axis(&lowest, params.snr_floor, params.fallback_exponent);
    let time_axis = TickedTime::new(start, end, time_ticks(start, end, params.tick_count));

    let area = root;
    area.fill(&WHITE)?;

    let axis_font = FontDesc::new(FontFamily::SansSerif, 26.0, FontStyle::Normal);
    let mut chart = ChartBuilder::on(&area)
        .caption(
            format!("Omicron triggers [{},{}] (s)", start, end),
            FontDesc::new(FontFamily::SansSerif, 24.0, FontStyle::Normal),
        )
        .margin(30)
        .set_label_area_size(LabelAreaPosition::Left, 110)
        .set_label_area_size(LabelAreaPosition::Bottom, 90)
        .build_cartesian_2d(time_axis, (y_min..y_max).log_scale())?;

    chart
        .configure_mesh()
        .bold_line_style(&BLACK.mix(0.35))
        .light_line_style(&TRANSPARENT)
        .x_desc(format!("Time [seconds] from {}", start))
        .y_desc(format!("SNR [{}]", query.channel()))
        .x_label_formatter(&|v| elapsed_label(*v, start))
        .y_label_formatter(&|v| format!("{:.0}", v))
        .label_style(axis_font.clone().color(&BLACK))
        .axis_desc_style(axis_font)
        .draw()?;

    // Lowest threshold first so louder tiers sit on top.
    for tier in &tiers {
        let color = RGBColor(tier.color[0], tier.color[1], tier.color[2]);
        let bar_style = ShapeStyle {
            color: color.to_rgba(),
            filled: false,
            stroke_width: 2,
        };
        // log10(0) has no position on the SNR axis
        let members: Vec<_> = select(table, tier)
            .into_iter()
            .filter(|r| r.snr > 0.0)
            .collect();

        chart.draw_series(members.iter().map(|r| {
            ErrorBar::new_horizontal(r.snr, r.tstart, r.time, r.tend, bar_style, 8)
        }))?;
        chart
            .draw_series(
                members
                    .iter()
                    .map(|r| Circle::new((r.time, r.snr), 4, color.filled())),
            )?
            .label(tier.label())
            .legend(move |(x, y)| Circle::new((x + 10, y), 5, color.filled()));
    }

    chart
        .configure_series_labels()
        .background_style(&WHITE.mix(0.8))
        .border_style(&BLACK.mix(0.3))
        .label_font(FontDesc::new(FontFamily::SansSerif, 22.0, FontStyle::Normal))
        .position(SeriesLabelPosition::UpperRight)
        .draw()?;

    area.present()?;
    Ok(())
}

/// Linear time coordinate whose grid lines and labels sit on fixed ticks.
struct TickedTime {
    linear: RangedCoordf64,
    ticks: Vec<f64>,
}

impl TickedTime {
    fn new(start: f64, end: f64, ticks: Vec<f64>) -> Self {
        Self {
            linear: (start..end).into(),
            ticks,
        }
    }
}

impl Ranged for TickedTime {
    type FormatOption = DefaultFormatting;
    type ValueType = f64;

    fn map(&self, value: &f64, limit: (i32, i32)) -> i32 {
        self.linear.map(value, limit)
    }

    fn key_points<Hint: KeyPointHint>(&self, _hint: Hint) -> Vec<f64> {
        self.ticks.clone()
    }

    fn range(&self) -> Range<f64> {
        self.linear.range()
    }
}

/// Passes drawing through, but treats font failures as "draw no text" so a
/// host without usable fonts still gets the markers and axes.
struct TextTolerantBackend<DB> {
    inner: DB,
}

impl<DB> TextTolerantBackend<DB> {
    fn new(inner: DB) -> Self {
        Self { inner }
    }
}

impl<DB: DrawingBackend> DrawingBackend for TextTolerantBackend<DB> {
    type ErrorType = DB::ErrorType;

    fn get_size(&self) -> (u32, u32) {
        self.inner.get_size()
    }

    fn ensure_prepared(&mut self) -> Result<(), DrawingErrorKind<Self::ErrorType>> {
        self.inner.ensure_prepared()
    }

    fn present(&mut self) -> Result<(), DrawingErrorKind<Self::ErrorType>> {
        self.inner.present()
    }

    fn draw_pixel(
        &mut self,
        point: BackendCoord,
        color: BackendColor,
    ) -> Result<(), DrawingErrorKind<Self::ErrorType>> {
        self.inner.draw_pixel(point, color)
    }

    // Fills stay on the inner backend's fast path
    fn draw_rect<S: plotters_backend::BackendStyle>(
        &mut self,
        upper_left: BackendCoord,
        bottom_right: BackendCoord,
        style: &S,
        fill: bool,
    ) -> Result<(), DrawingErrorKind<Self::ErrorType>> {
        self.inner.draw_rect(upper_left, bottom_right, style, fill)
    }

    fn draw_text<TStyle: BackendTextStyle>(
        &mut self,
        text: &str,
        style: &TStyle,
        pos: BackendCoord,
    ) -> Result<(), DrawingErrorKind<Self::ErrorType>> {
        match panic::catch_unwind(panic::AssertUnwindSafe(|| {
            self.inner.draw_text(text, style, pos)
        })) {
            Ok(Err(DrawingErrorKind::FontError(_))) | Err(_) => Ok(()),
            Ok(result) => result,
        }
    }

    fn estimate_text_size<TStyle: BackendTextStyle>(
        &self,
        text: &str,
        style: &TStyle,
    ) -> Result<(u32, u32), DrawingErrorKind<Self::ErrorType>> {
        match self.inner.estimate_text_size(text, style) {
            Err(DrawingErrorKind::FontError(_)) => {
                // Rough advance of a sans-serif glyph
                let size = style.size().max(1.0);
                let width = (text.chars().count() as f64 * size * 0.6).ceil() as u32;
                Ok((width, size.ceil() as u32))
            }
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use omicron_triage::{merge, EventRecord, Fragment};
    use std::path::PathBuf;
    use tempfile::TempDir;

    const PNG_MAGIC: &[u8] = b"\x89PNG\r\n\x1a\n";

    fn small_params() -> Params {
        Params {
            image_width: 480,
            image_height: 360,
            ..Params::default()
        }
    }

    fn table(query: &Query, snrs: &[f64]) -> TriggerTable {
        let records = snrs
            .iter()
            .enumerate()
            .map(|(i, snr)| {
                let time = query.window_start() + 10.0 * (i as f64 + 1.0);
                EventRecord {
                    time,
                    frequency: 40.0,
                    tstart: time - 0.4,
                    tend: time + 1.2,
                    fstart: 30.0,
                    fend: 55.0,
                    snr: *snr,
                    q: 5.66,
                    amplitude: 1e-22,
                    phase: 0.0,
                }
            })
            .collect();
        let fragment = Fragment {
            path: PathBuf::from("H1-CH_OMICRON-0-100.csv"),
            range_min: 0,
            range_max: 100,
        };
        merge(query, vec![(fragment, records)]).0
    }

    #[test]
    fn test_render_tiered_plot() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("Omicron").join("plot.png");
        let query = Query::new("H1", "LSC_REFL_A_LF_OUT_DQ", 1000.0, 1100.0, 5.0).unwrap();
        let table = table(&query, &[6.0, 14.0, 30.0, 40.0, 350.0]);

        render_chart_guard(&table, &query, &small_params(), &path).unwrap();
        let bytes = fs::read(&path).unwrap();
        assert!(bytes.starts_with(PNG_MAGIC));
    }

    #[test]
    fn test_render_empty_table() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("empty.png");
        let query = Query::new("L1", "GDS_CALIB_STRAIN", 0.0, 64.0, 5.0).unwrap();

        render_chart_guard(&TriggerTable::default(), &query, &small_params(), &path).unwrap();
        assert!(fs::read(&path).unwrap().starts_with(PNG_MAGIC));
    }

    #[test]
    fn test_time_axis_labels_follow_ticks() {
        let ticks = time_ticks(1000.0, 1800.0, 9);
        let axis = TickedTime::new(1000.0, 1800.0, ticks.clone());
        let points = axis.key_points(4usize);
        assert_eq!(points, ticks);
        let labels: Vec<String> = points.iter().map(|v| elapsed_label(*v, 1000.0)).collect();
        assert_eq!(
            labels,
            vec!["0", "100", "200", "300", "400", "500", "600", "700", "800"]
        );
        assert_eq!(axis.range(), 1000.0..1800.0);
        assert_eq!(axis.map(&1400.0, (0, 800)), 400);
    }

    #[test]
    fn test_render_leaves_table_untouched() {
        let dir = TempDir::new().unwrap();
        let query = Query::new("H1", "CH", 1000.0, 1100.0, 0.0).unwrap();
        let table = table(&query, &[0.5, 8.0]);
        let before = table.clone();
        render_chart_guard(&table, &query, &small_params(), &dir.path().join("p.png")).unwrap();
        assert_eq!(table, before);
    }
}
