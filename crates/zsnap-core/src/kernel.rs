//! 几何内核能力接口
//!
//! 取整引擎只依赖内核提供的三类能力：
//! - 坐标比较（精确）
//! - 线段与线段求交（精确）
//! - 点到线段的平方距离
//!
//! 数值类型由 [`Field`] 描述，内核由 [`Kernel`] 描述。本模块提供两个适配器：
//! - [`ExactKernel`]：基于 `BigRational` 的精确有理数内核
//! - [`FloatKernel`]：基于 `f64` 的浮点内核（比较遇到 NaN 时报告不确定）

use crate::error::{SnapError, SnapResult};
use crate::geometry::{Point2, Segment2, SegmentIntersection};
use num_bigint::BigInt;
use num_rational::BigRational;
use num_traits::{FromPrimitive, Num, One, Signed, ToPrimitive, Zero};
use std::cmp::Ordering;
use std::fmt::Debug;

/// 数值类型（域）
///
/// 要求支持四则运算、符号与整数互转。
pub trait Field:
    Clone + Debug + PartialEq + PartialOrd + Num + Signed + FromPrimitive + ToPrimitive + Send + Sync + 'static
{
    /// 由整数构造
    fn from_int(value: i64) -> Self;

    /// 向下取整，超出 `i64` 范围时返回 `None`
    fn floor_to_i64(&self) -> Option<i64>;

    /// 1/2
    fn half() -> Self {
        Self::one() / Self::from_int(2)
    }
}

impl Field for f64 {
    fn from_int(value: i64) -> Self {
        value as f64
    }

    fn floor_to_i64(&self) -> Option<i64> {
        if self.is_finite() {
            self.floor().to_i64()
        } else {
            None
        }
    }
}

impl Field for BigRational {
    fn from_int(value: i64) -> Self {
        BigRational::from_integer(BigInt::from(value))
    }

    fn floor_to_i64(&self) -> Option<i64> {
        self.floor().to_integer().to_i64()
    }
}

/// 几何内核
///
/// 所有谓词都有默认实现，适配器只需指定数值类型。
pub trait Kernel: Send + Sync {
    type FT: Field;

    /// 比较两个数值
    fn compare(&self, a: &Self::FT, b: &Self::FT) -> SnapResult<Ordering> {
        a.partial_cmp(b)
            .ok_or_else(|| SnapError::Indeterminate(format!("{:?} <=> {:?}", a, b)))
    }

    /// 数值的符号
    fn sign(&self, a: &Self::FT) -> SnapResult<Ordering> {
        self.compare(a, &Self::FT::zero())
    }

    /// 字典序比较两点（先 x 后 y）
    fn compare_xy(&self, p: &Point2<Self::FT>, q: &Point2<Self::FT>) -> SnapResult<Ordering> {
        match self.compare(&p.x, &q.x)? {
            Ordering::Equal => self.compare(&p.y, &q.y),
            other => Ok(other),
        }
    }

    /// 三点方向：`Greater` 为左转（逆时针），`Less` 为右转，`Equal` 为共线
    fn orientation(
        &self,
        p: &Point2<Self::FT>,
        q: &Point2<Self::FT>,
        r: &Point2<Self::FT>,
    ) -> SnapResult<Ordering> {
        let (ux, uy) = p.delta_to(q);
        let (vx, vy) = p.delta_to(r);
        self.sign(&(ux * vy - uy * vx))
    }

    /// 点是否落在线段上（含端点）
    fn on_segment(&self, p: &Point2<Self::FT>, s: &Segment2<Self::FT>) -> SnapResult<bool> {
        if self.orientation(&s.source, &s.target, p)? != Ordering::Equal {
            return Ok(false);
        }
        Ok(self.in_range(&p.x, &s.source.x, &s.target.x)?
            && self.in_range(&p.y, &s.source.y, &s.target.y)?)
    }

    /// `v` 是否位于 `a` 与 `b` 之间（闭区间，不要求 a <= b）
    fn in_range(&self, v: &Self::FT, a: &Self::FT, b: &Self::FT) -> SnapResult<bool> {
        let (lo, hi) = match self.compare(a, b)? {
            Ordering::Greater => (b, a),
            _ => (a, b),
        };
        Ok(self.compare(lo, v)? != Ordering::Greater && self.compare(v, hi)? != Ordering::Greater)
    }

    /// 线段求交
    ///
    /// 共线重叠时返回重叠部分的两个端点（字典序）。
    fn intersect(
        &self,
        s: &Segment2<Self::FT>,
        t: &Segment2<Self::FT>,
    ) -> SnapResult<SegmentIntersection<Self::FT>> {
        match (s.is_degenerate(), t.is_degenerate()) {
            (true, true) => {
                return Ok(if self.compare_xy(&s.source, &t.source)? == Ordering::Equal {
                    SegmentIntersection::Point(s.source.clone())
                } else {
                    SegmentIntersection::None
                });
            }
            (true, false) => {
                return Ok(if self.on_segment(&s.source, t)? {
                    SegmentIntersection::Point(s.source.clone())
                } else {
                    SegmentIntersection::None
                });
            }
            (false, true) => {
                return Ok(if self.on_segment(&t.source, s)? {
                    SegmentIntersection::Point(t.source.clone())
                } else {
                    SegmentIntersection::None
                });
            }
            (false, false) => {}
        }

        let (p, q) = (&s.source, &s.target);
        let (r, u) = (&t.source, &t.target);

        let o1 = self.orientation(p, q, r)?;
        let o2 = self.orientation(p, q, u)?;
        let o3 = self.orientation(r, u, p)?;
        let o4 = self.orientation(r, u, q)?;

        if o1 == Ordering::Equal && o2 == Ordering::Equal {
            return self.collinear_overlap(s, t);
        }

        let straddles = |a: Ordering, b: Ordering| {
            a == Ordering::Equal || b == Ordering::Equal || a != b
        };
        if !straddles(o1, o2) || !straddles(o3, o4) {
            return Ok(SegmentIntersection::None);
        }

        // 交点恰为某个端点时直接返回该端点，避免构造误差
        if o1 == Ordering::Equal {
            return Ok(SegmentIntersection::Point(r.clone()));
        }
        if o2 == Ordering::Equal {
            return Ok(SegmentIntersection::Point(u.clone()));
        }
        if o3 == Ordering::Equal {
            return Ok(SegmentIntersection::Point(p.clone()));
        }
        if o4 == Ordering::Equal {
            return Ok(SegmentIntersection::Point(q.clone()));
        }

        let (d1x, d1y) = p.delta_to(q);
        let (d2x, d2y) = r.delta_to(u);
        let (wx, wy) = p.delta_to(r);
        let denom = d1x.clone() * d2y.clone() - d1y.clone() * d2x.clone();
        let t_num = wx * d2y - wy * d2x;
        let t = t_num / denom;

        Ok(SegmentIntersection::Point(Point2::new(
            p.x.clone() + t.clone() * d1x,
            p.y.clone() + t * d1y,
        )))
    }

    /// 共线线段的重叠部分
    fn collinear_overlap(
        &self,
        s: &Segment2<Self::FT>,
        t: &Segment2<Self::FT>,
    ) -> SnapResult<SegmentIntersection<Self::FT>> {
        let mut points = Vec::with_capacity(4);
        for p in [&s.source, &s.target] {
            if self.on_segment(p, t)? {
                points.push(p.clone());
            }
        }
        for p in [&t.source, &t.target] {
            if self.on_segment(p, s)? {
                points.push(p.clone());
            }
        }

        try_sort_by(&mut points, |a, b| self.compare_xy(a, b))?;
        points.dedup();

        Ok(match points.len() {
            0 => SegmentIntersection::None,
            1 => SegmentIntersection::Point(points.remove(0)),
            _ => {
                let last = points.len() - 1;
                let end = points.swap_remove(last);
                SegmentIntersection::Overlap(points.swap_remove(0), end)
            }
        })
    }

    /// 点到线段的平方距离
    fn squared_distance(&self, p: &Point2<Self::FT>, s: &Segment2<Self::FT>) -> SnapResult<Self::FT> {
        let (vx, vy) = s.source.delta_to(&s.target);
        let (wx, wy) = s.source.delta_to(p);

        let c1 = wx.clone() * vx.clone() + wy.clone() * vy.clone();
        if self.sign(&c1)? != Ordering::Greater {
            return Ok(wx.clone() * wx + wy.clone() * wy);
        }

        let c2 = vx.clone() * vx.clone() + vy.clone() * vy.clone();
        if self.compare(&c2, &c1)? != Ordering::Greater {
            let (ex, ey) = s.target.delta_to(p);
            return Ok(ex.clone() * ex + ey.clone() * ey);
        }

        let cross = vx * wy - vy * wx;
        Ok(cross.clone() * cross / c2)
    }
}

/// 精确有理数内核
#[derive(Debug, Clone, Copy, Default)]
pub struct ExactKernel;

impl Kernel for ExactKernel {
    type FT = BigRational;
}

/// 浮点内核
///
/// 谓词不保证精确，只在输入本身可靠时使用。
#[derive(Debug, Clone, Copy, Default)]
pub struct FloatKernel;

impl Kernel for FloatKernel {
    type FT = f64;
}

/// 使用可能失败的比较函数排序
///
/// 比较失败时返回第一个错误，切片顺序不作保证。
pub fn try_sort_by<T, F>(items: &mut [T], mut compare: F) -> SnapResult<()>
where
    F: FnMut(&T, &T) -> SnapResult<Ordering>,
{
    let mut failure = None;
    items.sort_by(|a, b| match compare(a, b) {
        Ok(ordering) => ordering,
        Err(e) => {
            failure.get_or_insert(e);
            Ordering::Equal
        }
    });
    match failure {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rat(n: i64, d: i64) -> BigRational {
        BigRational::new(BigInt::from(n), BigInt::from(d))
    }

    fn seg(x1: i64, y1: i64, x2: i64, y2: i64) -> Segment2<BigRational> {
        Segment2::new(
            Point2::new(BigRational::from_int(x1), BigRational::from_int(y1)),
            Point2::new(BigRational::from_int(x2), BigRational::from_int(y2)),
        )
    }

    #[test]
    fn test_proper_intersection_is_exact() {
        let k = ExactKernel;
        // (0,0)-(3,1) 与 (0,1)-(3,0) 交于 (3/2, 1/2)
        let result = k.intersect(&seg(0, 0, 3, 1), &seg(0, 1, 3, 0)).unwrap();
        assert_eq!(
            result,
            SegmentIntersection::Point(Point2::new(rat(3, 2), rat(1, 2)))
        );
    }

    #[test]
    fn test_disjoint_and_parallel() {
        let k = ExactKernel;
        assert_eq!(
            k.intersect(&seg(0, 0, 1, 0), &seg(0, 1, 1, 1)).unwrap(),
            SegmentIntersection::None
        );
        assert_eq!(
            k.intersect(&seg(0, 0, 1, 1), &seg(2, 0, 3, -5)).unwrap(),
            SegmentIntersection::None
        );
    }

    #[test]
    fn test_touching_endpoint() {
        let k = ExactKernel;
        let result = k.intersect(&seg(0, 0, 2, 0), &seg(1, 0, 1, 5)).unwrap();
        assert_eq!(
            result,
            SegmentIntersection::Point(Point2::new(rat(1, 1), rat(0, 1)))
        );
    }

    #[test]
    fn test_collinear_overlap() {
        let k = ExactKernel;
        let result = k.intersect(&seg(0, 0, 4, 0), &seg(6, 0, 2, 0)).unwrap();
        assert_eq!(
            result,
            SegmentIntersection::Overlap(
                Point2::new(rat(2, 1), rat(0, 1)),
                Point2::new(rat(4, 1), rat(0, 1))
            )
        );

        // 共线但只在端点相接
        let touch = k.intersect(&seg(0, 0, 2, 2), &seg(2, 2, 5, 5)).unwrap();
        assert_eq!(touch, SegmentIntersection::Point(Point2::new(rat(2, 1), rat(2, 1))));
    }

    #[test]
    fn test_degenerate_segments() {
        let k = ExactKernel;
        assert_eq!(
            k.intersect(&seg(1, 1, 1, 1), &seg(0, 0, 2, 2)).unwrap(),
            SegmentIntersection::Point(Point2::new(rat(1, 1), rat(1, 1)))
        );
        assert_eq!(
            k.intersect(&seg(1, 1, 1, 1), &seg(1, 2, 1, 2)).unwrap(),
            SegmentIntersection::None
        );
    }

    #[test]
    fn test_squared_distance() {
        let k = ExactKernel;
        let s = seg(0, 0, 10, 0);
        let p = Point2::new(BigRational::from_int(5), BigRational::from_int(3));
        assert_eq!(k.squared_distance(&p, &s).unwrap(), rat(9, 1));

        // 投影落在起点之前
        let q = Point2::new(BigRational::from_int(-3), BigRational::from_int(4));
        assert_eq!(k.squared_distance(&q, &s).unwrap(), rat(25, 1));
    }

    #[test]
    fn test_float_kernel_reports_nan() {
        let k = FloatKernel;
        let err = k.compare(&f64::NAN, &1.0).unwrap_err();
        assert!(matches!(err, SnapError::Indeterminate(_)));
    }

    #[test]
    fn test_floor_to_i64() {
        assert_eq!(rat(-1, 2).floor_to_i64(), Some(-1));
        assert_eq!(rat(7, 2).floor_to_i64(), Some(3));
        assert_eq!((-0.5f64).floor_to_i64(), Some(-1));
        assert_eq!(f64::INFINITY.floor_to_i64(), None);
    }
}
