use std::path::Path;

use anyhow::{Result, anyhow, ensure};
use log::info;
use tch::Tensor;

pub trait ToTensor {
    fn to_tensor(&self) -> Result<Tensor>;
}

/// A single state becomes a `[1, dim]` batch.
impl ToTensor for [f32] {
    fn to_tensor(&self) -> Result<Tensor> {
        Ok(Tensor::from_slice(self).unsqueeze(0))
    }
}

/// Equal-length rows become a `[rows, dim]` batch.
impl ToTensor for [Vec<f32>] {
    fn to_tensor(&self) -> Result<Tensor> {
        ensure!(!self.is_empty(), "cannot build a tensor from an empty batch");
        let dim = self[0].len();
        ensure!(
            self.iter().all(|row| row.len() == dim),
            "rows of a batch must share one length"
        );
        let flat: Vec<f32> = self.iter().flatten().copied().collect();
        Ok(Tensor::from_slice(&flat).reshape([self.len() as i64, dim as i64]))
    }
}

/// Seeds libtorch; callers derive their own `StdRng`s from the same seed.
pub fn set_seeds(seed: u64) {
    tch::manual_seed(seed as i64);
}

pub fn plot_rewards(rewards: &[f64], filename: &Path, title: &str) -> Result<()> {
    use plotters::prelude::*;

    let draw_err = |e: &dyn std::fmt::Display| anyhow!("plotting {}: {e}", filename.display());

    let root = BitMapBackend::new(filename, (800, 600)).into_drawing_area();
    root.fill(&WHITE).map_err(|e| draw_err(&e))?;

    let min_reward = rewards.iter().cloned().fold(f64::MAX, f64::min).min(0.0);
    let max_reward = rewards.iter().cloned().fold(f64::MIN, f64::max).max(1.0); // 避免空图或全为 0

    let mut chart = ChartBuilder::on(&root)
        .caption(title, ("sans-serif", 32).into_font())
        .margin(30)
        .x_label_area_size(40)
        .y_label_area_size(50)
        .build_cartesian_2d(0..rewards.len().max(1), min_reward..max_reward)
        .map_err(|e| draw_err(&e))?;

    chart
        .configure_mesh()
        .x_desc("Episode")
        .y_desc("Performance")
        .axis_desc_style(("sans-serif", 22))
        .label_style(("sans-serif", 18))
        .light_line_style(&WHITE.mix(0.3))
        .draw()
        .map_err(|e| draw_err(&e))?;

    chart
        .draw_series(LineSeries::new(
            rewards.iter().enumerate().map(|(i, r)| (i, *r)),
            &BLUE,
        ))
        .map_err(|e| draw_err(&e))?
        .label("Performance")
        .legend(|(x, y)| PathElement::new([(x, y), (x + 20, y)], &BLUE));

    chart
        .configure_series_labels()
        .background_style(&WHITE.mix(0.8))
        .border_style(&BLACK)
        .label_font(("sans-serif", 18))
        .draw()
        .map_err(|e| draw_err(&e))?;

    root.present().map_err(|e| draw_err(&e))?;
    info!("Saved training plot to {}", filename.display());
    Ok(())
}
