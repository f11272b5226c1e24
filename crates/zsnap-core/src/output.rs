//! 输出坐标映射
//!
//! 把每条线段经过的热像素序列转换为折线：
//! - 整数网格坐标：包含原点的像素映射为 `(0, 0)`，相邻像素相差 1，与像素宽度无关
//! - 原始尺度坐标：像素中心取其真实位置 `(i·w, j·w)`

use crate::geometry::{Point2, Polyline};
use crate::kernel::Field;
use crate::pixel::Pixel;
use serde::{Deserialize, Serialize};

/// 输出坐标模式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OutputMode {
    /// 整数网格坐标
    IntegerGrid,
    /// 原始尺度坐标
    OriginalScale,
}

impl OutputMode {
    pub fn from_flag(integer_output: bool) -> Self {
        if integer_output {
            OutputMode::IntegerGrid
        } else {
            OutputMode::OriginalScale
        }
    }
}

/// 输出映射器
#[derive(Debug, Clone)]
pub struct OutputMapper<T> {
    mode: OutputMode,
    width: T,
}

impl<T: Field> OutputMapper<T> {
    pub fn new(mode: OutputMode, width: T) -> Self {
        Self { mode, width }
    }

    pub fn mode(&self) -> OutputMode {
        self.mode
    }

    pub fn map_pixel(&self, pixel: &Pixel) -> Point2<T> {
        match self.mode {
            OutputMode::IntegerGrid => pixel.grid_point(),
            OutputMode::OriginalScale => pixel.center(&self.width),
        }
    }

    pub fn map_route(&self, route: &[Pixel]) -> Polyline<T> {
        route.iter().map(|p| self.map_pixel(p)).collect()
    }

    pub fn map_all(&self, routes: &[Vec<Pixel>]) -> Vec<Polyline<T>> {
        routes.iter().map(|r| self.map_route(r)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use num_bigint::BigInt;
    use num_rational::BigRational;

    #[test]
    fn test_integer_grid_ignores_width() {
        let mapper = OutputMapper::new(OutputMode::from_flag(true), 0.25f64);
        assert_eq!(mapper.map_pixel(&Pixel::new(1, 0)), Point2::new(1.0, 0.0));
        assert_eq!(mapper.map_pixel(&Pixel::new(0, 0)), Point2::new(0.0, 0.0));
    }

    #[test]
    fn test_original_scale() {
        let w = BigRational::new(BigInt::from(1), BigInt::from(3));
        let mapper = OutputMapper::new(OutputMode::OriginalScale, w.clone());
        let route = vec![Pixel::new(1, 0), Pixel::new(2, -3)];
        let polyline = mapper.map_route(&route);
        assert_eq!(polyline[0], Point2::new(w.clone(), BigRational::from_int(0)));
        assert_eq!(polyline[1], Point2::new(w.clone() * BigRational::from_int(2), -BigRational::from_int(1)));
    }
}
