//! 取整结果校验
//!
//! 朴素地检查折线集合的顶点与非关联边之间的距离，用于验证迭代吸附取整的半像素间隔。
//! 复杂度为 O(顶点数 × 边数)，适合测试与离线校验。

use crate::error::SnapResult;
use crate::geometry::{Point2, Polyline, Segment2};
use crate::kernel::{try_sort_by, Kernel};
use std::cmp::Ordering;

/// 间隔不足的顶点与边
#[derive(Debug, Clone, PartialEq)]
pub struct SeparationViolation<T> {
    pub vertex: Point2<T>,
    pub edge: Segment2<T>,
    pub squared_distance: T,
}

/// 找出所有距离某条非关联边小于 `min_distance` 的顶点
pub fn separation_violations<K: Kernel>(
    kernel: &K,
    polylines: &[Polyline<K::FT>],
    min_distance: &K::FT,
) -> SnapResult<Vec<SeparationViolation<K::FT>>> {
    let mut vertices: Vec<Point2<K::FT>> = polylines.iter().flatten().cloned().collect();
    try_sort_by(&mut vertices, |a, b| kernel.compare_xy(a, b))?;
    vertices.dedup();

    let mut edges: Vec<Segment2<K::FT>> = Vec::new();
    for polyline in polylines {
        for pair in polyline.windows(2) {
            if pair[0] == pair[1] {
                continue;
            }
            let (a, b) = if kernel.compare_xy(&pair[0], &pair[1])? == Ordering::Greater {
                (pair[1].clone(), pair[0].clone())
            } else {
                (pair[0].clone(), pair[1].clone())
            };
            edges.push(Segment2::new(a, b));
        }
    }
    try_sort_by(&mut edges, |a, b| {
        Ok(kernel
            .compare_xy(&a.source, &b.source)?
            .then(kernel.compare_xy(&a.target, &b.target)?))
    })?;
    edges.dedup();

    let limit = min_distance.clone() * min_distance.clone();
    let mut violations = Vec::new();
    for vertex in &vertices {
        for edge in &edges {
            if *vertex == edge.source || *vertex == edge.target {
                continue;
            }
            let d2 = kernel.squared_distance(vertex, edge)?;
            if kernel.compare(&d2, &limit)? == Ordering::Less {
                violations.push(SeparationViolation {
                    vertex: vertex.clone(),
                    edge: edge.clone(),
                    squared_distance: d2,
                });
            }
        }
    }
    Ok(violations)
}
