//! 排列顶点枚举
//!
//! 顶点包括所有线段端点，以及任意两条线段的精确交点（共线重叠贡献重叠段的两个端点）。
//! 采用朴素的两两求交，先用包围盒快速排除，再交给内核精确判定。

use crate::error::SnapResult;
use crate::geometry::{Point2, Segment2, SegmentIntersection};
use crate::kernel::{try_sort_by, Kernel};
use rayon::prelude::*;
use std::cmp::Ordering;
use tracing::debug;

/// 顶点枚举器
pub struct VertexEnumerator<'a, K: Kernel> {
    kernel: &'a K,
}

impl<'a, K: Kernel> VertexEnumerator<'a, K> {
    pub fn new(kernel: &'a K) -> Self {
        Self { kernel }
    }

    /// 枚举全部顶点，结果按字典序排序且去重
    pub fn enumerate(&self, segments: &[Segment2<K::FT>]) -> SnapResult<Vec<Point2<K::FT>>> {
        let mut vertices: Vec<Point2<K::FT>> = segments
            .iter()
            .flat_map(|s| [s.source.clone(), s.target.clone()])
            .collect();

        let crossings: Vec<Vec<Point2<K::FT>>> = (0..segments.len())
            .into_par_iter()
            .map(|i| self.intersections_after(segments, i))
            .collect::<SnapResult<_>>()?;

        let crossing_count: usize = crossings.iter().map(Vec::len).sum();
        vertices.extend(crossings.into_iter().flatten());

        try_sort_by(&mut vertices, |a, b| self.kernel.compare_xy(a, b))?;
        vertices.dedup();

        debug!(
            "Enumerated {} vertices from {} segments ({} intersection points)",
            vertices.len(),
            segments.len(),
            crossing_count
        );
        Ok(vertices)
    }

    /// 第 `i` 条线段与其后所有线段的交点
    fn intersections_after(
        &self,
        segments: &[Segment2<K::FT>],
        i: usize,
    ) -> SnapResult<Vec<Point2<K::FT>>> {
        let s = &segments[i];
        let mut points = Vec::new();
        for t in &segments[i + 1..] {
            if self.boxes_disjoint(s, t)? {
                continue;
            }
            match self.kernel.intersect(s, t)? {
                SegmentIntersection::None => {}
                SegmentIntersection::Point(p) => points.push(p),
                SegmentIntersection::Overlap(a, b) => {
                    points.push(a);
                    points.push(b);
                }
            }
        }
        Ok(points)
    }

    /// 两条线段的包围盒是否分离
    fn boxes_disjoint(&self, s: &Segment2<K::FT>, t: &Segment2<K::FT>) -> SnapResult<bool> {
        let k = self.kernel;
        let axis_disjoint = |a0: &K::FT, a1: &K::FT, b0: &K::FT, b1: &K::FT| -> SnapResult<bool> {
            let (a_lo, a_hi) = ordered(k, a0, a1)?;
            let (b_lo, b_hi) = ordered(k, b0, b1)?;
            Ok(k.compare(a_hi, b_lo)? == Ordering::Less || k.compare(b_hi, a_lo)? == Ordering::Less)
        };

        Ok(axis_disjoint(&s.source.x, &s.target.x, &t.source.x, &t.target.x)?
            || axis_disjoint(&s.source.y, &s.target.y, &t.source.y, &t.target.y)?)
    }
}

fn ordered<'v, K: Kernel>(kernel: &K, a: &'v K::FT, b: &'v K::FT) -> SnapResult<(&'v K::FT, &'v K::FT)> {
    Ok(if kernel.compare(a, b)? == Ordering::Greater {
        (b, a)
    } else {
        (a, b)
    })
}
