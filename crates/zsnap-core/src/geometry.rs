//! 几何图元定义
//!
//! 支持的基本图元：
//! - 点 (Point2)
//! - 线段 (Segment2)
//! - 折线 (Polyline)
//!
//! 图元对数值类型泛型，运算由 [`Field`] 提供。

use crate::kernel::Field;
use serde::{Deserialize, Serialize};

/// 点
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Point2<T> {
    pub x: T,
    pub y: T,
}

impl<T> Point2<T> {
    pub fn new(x: T, y: T) -> Self {
        Self { x, y }
    }
}

impl<T: Field> Point2<T> {
    /// 由整数坐标构造
    pub fn from_ints(x: i64, y: i64) -> Self {
        Self::new(T::from_int(x), T::from_int(y))
    }

    /// 从当前点指向 `other` 的向量
    pub fn delta_to(&self, other: &Point2<T>) -> (T, T) {
        (other.x.clone() - self.x.clone(), other.y.clone() - self.y.clone())
    }

    /// 坐标同时除以 `factor`
    pub fn div_by(&self, factor: &T) -> Self {
        Self::new(self.x.clone() / factor.clone(), self.y.clone() / factor.clone())
    }

    /// 坐标同时乘以 `factor`
    pub fn mul_by(&self, factor: &T) -> Self {
        Self::new(self.x.clone() * factor.clone(), self.y.clone() * factor.clone())
    }

    /// 转换为浮点坐标（用于近似索引）
    pub fn to_f64(&self) -> Option<nalgebra::Point2<f64>> {
        let x = self.x.to_f64()?;
        let y = self.y.to_f64()?;
        if x.is_finite() && y.is_finite() {
            Some(nalgebra::Point2::new(x, y))
        } else {
            None
        }
    }
}

/// 线段
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Segment2<T> {
    pub source: Point2<T>,
    pub target: Point2<T>,
}

impl<T> Segment2<T> {
    pub fn new(source: Point2<T>, target: Point2<T>) -> Self {
        Self { source, target }
    }
}

impl<T: Field> Segment2<T> {
    /// 两端点重合
    pub fn is_degenerate(&self) -> bool {
        self.source == self.target
    }

    /// 参数 `t` 处的点，`t = 0` 为起点，`t = 1` 为终点
    pub fn point_at(&self, t: &T) -> Point2<T> {
        let (dx, dy) = self.source.delta_to(&self.target);
        Point2::new(
            self.source.x.clone() + t.clone() * dx,
            self.source.y.clone() + t.clone() * dy,
        )
    }

    /// 坐标同时除以 `factor`
    pub fn div_by(&self, factor: &T) -> Self {
        Self::new(self.source.div_by(factor), self.target.div_by(factor))
    }
}

/// 线段求交结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SegmentIntersection<T> {
    /// 不相交
    None,
    /// 交于一点
    Point(Point2<T>),
    /// 共线重叠，给出重叠部分的两个端点
    Overlap(Point2<T>, Point2<T>),
}

/// 折线：按顺序排列的点
pub type Polyline<T> = Vec<Point2<T>>;

#[cfg(test)]
mod tests {
    use super::*;
    use num_rational::BigRational;

    #[test]
    fn test_point_at() {
        let s: Segment2<f64> = Segment2::new(Point2::new(0.0, 0.0), Point2::new(4.0, 2.0));
        assert_eq!(s.point_at(&0.5), Point2::new(2.0, 1.0));
        assert!(!s.is_degenerate());
    }

    #[test]
    fn test_scale_rational() {
        let p: Point2<BigRational> = Point2::from_ints(3, -6);
        let w = BigRational::from_int(2);
        assert_eq!(p.div_by(&w).mul_by(&w), p);
    }

    #[test]
    fn test_to_f64() {
        let p: Point2<BigRational> = Point2::from_ints(1, 2).div_by(&BigRational::from_int(4));
        let q = p.to_f64().unwrap();
        assert_eq!((q.x, q.y), (0.25, 0.5));
        assert!(Point2::new(f64::NAN, 0.0).to_f64().is_none());
    }
}
