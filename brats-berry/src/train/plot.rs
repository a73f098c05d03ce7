//! 损失曲线.

use std::path::Path;

use image::{ImageResult, Rgb, RgbImage};

const WIDTH: u32 = 640;
const HEIGHT: u32 = 480;
const MARGIN: u32 = 40;

/// 训练损失颜色 (绿).
pub const TRAIN_COLOR: Rgb<u8> = Rgb([0, 160, 0]);

/// 验证损失颜色 (蓝).
pub const VALID_COLOR: Rgb<u8> = Rgb([0, 0, 220]);

const AXIS_COLOR: Rgb<u8> = Rgb([0, 0, 0]);

/// 画出训练与验证损失随 epoch 的变化. 横轴为 epoch, 纵轴从 0 到最大损失.
pub fn render_losses(train: &[f64], valid: &[f64]) -> RgbImage {
    let mut img = RgbImage::from_pixel(WIDTH, HEIGHT, Rgb([255, 255, 255]));
    let (x0, y0) = (MARGIN as i64, (HEIGHT - MARGIN) as i64);
    let (x1, y1) = ((WIDTH - MARGIN) as i64, MARGIN as i64);
    draw_line(&mut img, (x0, y0), (x1, y0), AXIS_COLOR);
    draw_line(&mut img, (x0, y0), (x0, y1), AXIS_COLOR);

    let n = train.len().max(valid.len());
    let top = train
        .iter()
        .chain(valid)
        .copied()
        .filter(|v| v.is_finite())
        .fold(0.0f64, f64::max);
    if n == 0 || top <= 0.0 {
        return img;
    }

    let to_px = |i: usize, v: f64| -> (i64, i64) {
        let fx = if n == 1 { 0.0 } else { i as f64 / (n - 1) as f64 };
        let fy = (v / top).clamp(0.0, 1.0);
        (
            x0 + (fx * (x1 - x0) as f64).round() as i64,
            y0 - (fy * (y0 - y1) as f64).round() as i64,
        )
    };
    for (series, color) in [(train, TRAIN_COLOR), (valid, VALID_COLOR)] {
        let points: Vec<(i64, i64)> = series
            .iter()
            .enumerate()
            .filter(|(_, v)| v.is_finite())
            .map(|(i, v)| to_px(i, *v))
            .collect();
        match points.as_slice() {
            [p] => draw_line(&mut img, *p, *p, color),
            _ => {
                for w in points.windows(2) {
                    draw_line(&mut img, w[0], w[1], color);
                }
            }
        }
    }
    img
}

/// 画出损失曲线并保存为 `path` (覆盖已有文件).
pub fn plot_losses<P: AsRef<Path>>(train: &[f64], valid: &[f64], path: P) -> ImageResult<()> {
    render_losses(train, valid).save(path)
}

/// Bresenham 直线, 超出画布的点被忽略.
fn draw_line(img: &mut RgbImage, (mut x, mut y): (i64, i64), (x1, y1): (i64, i64), c: Rgb<u8>) {
    let dx = (x1 - x).abs();
    let dy = -(y1 - y).abs();
    let sx = if x < x1 { 1 } else { -1 };
    let sy = if y < y1 { 1 } else { -1 };
    let mut err = dx + dy;
    loop {
        if (0..img.width() as i64).contains(&x) && (0..img.height() as i64).contains(&y) {
            img.put_pixel(x as u32, y as u32, c);
        }
        if x == x1 && y == y1 {
            break;
        }
        let e2 = 2 * err;
        if e2 >= dy {
            err += dy;
            x += sx;
        }
        if e2 <= dx {
            err += dx;
            y += sy;
        }
    }
}
