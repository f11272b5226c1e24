//! 空间索引
//!
//! 使用一组旋转坐标系下的 kd 树（簇）存储热像素中心，支持：
//! - 线段的闵可夫斯基和包围盒范围查询
//! - 按查询选择包围盒面积最小的旋转角度
//! - 按代价估计跳过很少被选中的旋转角度
//!
//! 索引在像素单位下工作（像素中心为整数点），使用 f64。
//! 查询盒会略微放大，浮点误差只会多出候选，不会漏掉候选；精确过滤由调用方完成。

use nalgebra::{Point2, Rotation2};
use std::f64::consts::FRAC_PI_2;
use tracing::debug;

/// kd 树叶子容量
const LEAF_SIZE: usize = 8;

/// 查询盒的相对放大量
const QUERY_MARGIN: f64 = 1e-9;

/// 轴对齐包围盒
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Aabb {
    pub min: Point2<f64>,
    pub max: Point2<f64>,
}

impl Aabb {
    pub fn new(min: Point2<f64>, max: Point2<f64>) -> Self {
        Self { min, max }
    }

    /// 空包围盒（与任何盒都不相交）
    pub fn empty() -> Self {
        Self {
            min: Point2::new(f64::INFINITY, f64::INFINITY),
            max: Point2::new(f64::NEG_INFINITY, f64::NEG_INFINITY),
        }
    }

    pub fn from_points(points: impl IntoIterator<Item = Point2<f64>>) -> Self {
        let mut bbox = Self::empty();
        for p in points {
            bbox.include(&p);
        }
        bbox
    }

    pub fn include(&mut self, p: &Point2<f64>) {
        self.min.x = self.min.x.min(p.x);
        self.min.y = self.min.y.min(p.y);
        self.max.x = self.max.x.max(p.x);
        self.max.y = self.max.y.max(p.y);
    }

    /// 四周各扩展 `amount`
    pub fn expand(&self, amount: f64) -> Self {
        Self {
            min: Point2::new(self.min.x - amount, self.min.y - amount),
            max: Point2::new(self.max.x + amount, self.max.y + amount),
        }
    }

    pub fn width(&self) -> f64 {
        self.max.x - self.min.x
    }

    pub fn height(&self) -> f64 {
        self.max.y - self.min.y
    }

    pub fn area(&self) -> f64 {
        self.width() * self.height()
    }

    pub fn contains(&self, p: &Point2<f64>) -> bool {
        p.x >= self.min.x && p.x <= self.max.x && p.y >= self.min.y && p.y <= self.max.y
    }

    pub fn intersects(&self, other: &Aabb) -> bool {
        self.min.x <= other.max.x
            && self.max.x >= other.min.x
            && self.min.y <= other.max.y
            && self.max.y >= other.min.y
    }

    pub fn contains_box(&self, other: &Aabb) -> bool {
        self.contains(&other.min) && self.contains(&other.max)
    }
}

/// kd 树节点
#[derive(Debug, Clone)]
enum KdNode {
    Leaf {
        bbox: Aabb,
        start: usize,
        end: usize,
    },
    Branch {
        bbox: Aabb,
        left: usize,
        right: usize,
    },
}

impl KdNode {
    fn bbox(&self) -> &Aabb {
        match self {
            KdNode::Leaf { bbox, .. } | KdNode::Branch { bbox, .. } => bbox,
        }
    }
}

/// 静态 kd 树
///
/// 一次性批量构建：递归地在分布最宽的维度上按中位数划分。构建后不可修改，
/// 点集变化时整体重建。
#[derive(Debug, Clone)]
pub struct KdTree {
    entries: Vec<(Point2<f64>, usize)>,
    nodes: Vec<KdNode>,
    root: Option<usize>,
}

impl KdTree {
    /// 由 (坐标, 载荷) 批量构建
    pub fn build(entries: Vec<(Point2<f64>, usize)>) -> Self {
        let mut tree = Self {
            nodes: Vec::with_capacity(2 * entries.len() / LEAF_SIZE + 1),
            entries,
            root: None,
        };
        if !tree.entries.is_empty() {
            let len = tree.entries.len();
            tree.root = Some(tree.build_node(0, len));
        }
        tree
    }

    fn build_node(&mut self, start: usize, end: usize) -> usize {
        let bbox = Aabb::from_points(self.entries[start..end].iter().map(|(p, _)| *p));

        if end - start <= LEAF_SIZE {
            self.nodes.push(KdNode::Leaf { bbox, start, end });
            return self.nodes.len() - 1;
        }

        let dim = if bbox.width() >= bbox.height() { 0 } else { 1 };
        let mid = (end - start) / 2;
        self.entries[start..end]
            .select_nth_unstable_by(mid, |a, b| a.0[dim].total_cmp(&b.0[dim]));

        let left = self.build_node(start, start + mid);
        let right = self.build_node(start + mid, end);
        self.nodes.push(KdNode::Branch { bbox, left, right });
        self.nodes.len() - 1
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// 范围查询：返回落在矩形内（含边界）的所有载荷
    pub fn query_rect(&self, rect: &Aabb, out: &mut Vec<usize>) {
        let Some(root) = self.root else {
            return;
        };

        let mut stack = vec![root];
        while let Some(index) = stack.pop() {
            let node = &self.nodes[index];
            if !node.bbox().intersects(rect) {
                continue;
            }

            match node {
                KdNode::Leaf { bbox, start, end } => {
                    let whole = rect.contains_box(bbox);
                    out.extend(
                        self.entries[*start..*end]
                            .iter()
                            .filter(|(p, _)| whole || rect.contains(p))
                            .map(|(_, payload)| *payload),
                    );
                }
                KdNode::Branch { bbox, left, right } => {
                    if rect.contains_box(bbox) {
                        self.collect_all(index, out);
                    } else {
                        stack.push(*right);
                        stack.push(*left);
                    }
                }
            }
        }
    }

    fn collect_all(&self, index: usize, out: &mut Vec<usize>) {
        match &self.nodes[index] {
            KdNode::Leaf { start, end, .. } => {
                out.extend(self.entries[*start..*end].iter().map(|(_, payload)| *payload));
            }
            KdNode::Branch { left, right, .. } => {
                self.collect_all(*left, out);
                self.collect_all(*right, out);
            }
        }
    }
}

/// 查询线段（像素单位，浮点近似）
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QuerySegment {
    pub source: Point2<f64>,
    pub target: Point2<f64>,
}

impl QuerySegment {
    pub fn new(source: Point2<f64>, target: Point2<f64>) -> Self {
        Self { source, target }
    }
}

/// 线段与单位像素的闵可夫斯基和在旋转角 `angle` 的坐标系下的包围盒
pub fn minkowski_box(query: &QuerySegment, angle: f64) -> Aabb {
    let to_frame = Rotation2::new(-angle);
    let a = to_frame * query.source;
    let b = to_frame * query.target;

    // 旋转后的单位正方形在两个轴上的半宽
    let half = 0.5 * (angle.cos().abs() + angle.sin().abs());
    let scale = 1.0 + a.x.abs().max(a.y.abs()).max(b.x.abs()).max(b.y.abs());

    Aabb::from_points([a, b]).expand(half + QUERY_MARGIN * scale)
}

/// 某个旋转角度下的 kd 树
#[derive(Debug, Clone)]
pub struct RotatedTree {
    angle: f64,
    tree: KdTree,
}

impl RotatedTree {
    /// 在旋转坐标系下为像素中心建树，载荷为中心在切片中的下标
    pub fn build(angle: f64, centers: &[Point2<f64>]) -> Self {
        let to_frame = Rotation2::new(-angle);
        let entries = centers
            .iter()
            .enumerate()
            .map(|(index, c)| (to_frame * *c, index))
            .collect();
        Self {
            angle,
            tree: KdTree::build(entries),
        }
    }

    pub fn angle(&self) -> f64 {
        self.angle
    }

    pub fn query(&self, query: &QuerySegment, out: &mut Vec<usize>) {
        self.tree.query_rect(&minkowski_box(query, self.angle), out);
    }
}

/// 旋转树的代价估计器
///
/// 预测某个候选角度会被多大比例的查询选中，比例过低的角度不建树。
pub trait TreeCostEstimator: Send + Sync {
    /// 返回 `[0, 1]` 内的预测比例
    fn predicted_share(&self, queries: &[QuerySegment], angle: f64, candidates: &[f64]) -> f64;
}

/// 统计偏好角度的估计器
///
/// 对至多 `sample_limit` 条（等距抽样的）查询线段，计算各自面积最小的角度，
/// 以选中次数占比作为预测。
#[derive(Debug, Clone, Copy)]
pub struct PreferenceCountEstimator {
    pub sample_limit: usize,
}

impl Default for PreferenceCountEstimator {
    fn default() -> Self {
        Self { sample_limit: 1024 }
    }
}

impl TreeCostEstimator for PreferenceCountEstimator {
    fn predicted_share(&self, queries: &[QuerySegment], angle: f64, candidates: &[f64]) -> f64 {
        if queries.is_empty() {
            // 没有查询时只保留第一个角度
            return if candidates.first() == Some(&angle) { 1.0 } else { 0.0 };
        }

        let stride = queries.len().div_ceil(self.sample_limit.max(1));
        let mut sampled = 0usize;
        let mut preferred = 0usize;
        for query in queries.iter().step_by(stride) {
            sampled += 1;
            if best_angle(query, candidates) == Some(angle) {
                preferred += 1;
            }
        }
        preferred as f64 / sampled as f64
    }
}

/// 面积最小的角度，相同时取较小角度
fn best_angle(query: &QuerySegment, angles: &[f64]) -> Option<f64> {
    let mut best: Option<(f64, f64)> = None;
    for &angle in angles {
        let area = minkowski_box(query, angle).area();
        match best {
            Some((_, best_area)) if area >= best_area => {}
            _ => best = Some((angle, area)),
        }
    }
    best.map(|(angle, _)| angle)
}

/// 旋转 kd 树簇
#[derive(Debug, Clone)]
pub struct Cluster {
    trees: Vec<RotatedTree>,
}

impl Cluster {
    /// 候选旋转角度 `(i-1)·π/(2c)`，`i = 1..c`
    pub fn candidate_angles(count: u32) -> Vec<f64> {
        let count = count.max(1);
        (0..count)
            .map(|i| i as f64 * FRAC_PI_2 / count as f64)
            .collect()
    }

    /// 构建簇
    ///
    /// - `centers`: 热像素中心（像素单位）
    /// - `queries`: 本轮将要执行的查询，用于估计各角度的使用比例
    /// - `max_trees`: 候选角度数量上限
    /// - `min_share`: 预测比例低于此值的角度不建树
    pub fn build(
        centers: &[Point2<f64>],
        queries: &[QuerySegment],
        max_trees: u32,
        estimator: &dyn TreeCostEstimator,
        min_share: f64,
    ) -> Self {
        let candidates = Self::candidate_angles(max_trees);

        let angles: Vec<f64> = if candidates.len() == 1 {
            candidates.clone()
        } else {
            let shares: Vec<f64> = candidates
                .iter()
                .map(|&angle| estimator.predicted_share(queries, angle, &candidates))
                .collect();

            let mut kept: Vec<f64> = candidates
                .iter()
                .zip(&shares)
                .filter(|(_, share)| **share >= min_share)
                .map(|(&angle, _)| angle)
                .collect();

            if kept.is_empty() {
                // 至少保留预测比例最高的角度
                let mut best = 0;
                for (index, share) in shares.iter().enumerate() {
                    if *share > shares[best] {
                        best = index;
                    }
                }
                kept.push(candidates[best]);
            }
            kept
        };

        debug!(
            "Building kd-tree cluster: {} centers, {} of {} rotations",
            centers.len(),
            angles.len(),
            candidates.len()
        );

        Self {
            trees: angles
                .into_iter()
                .map(|angle| RotatedTree::build(angle, centers))
                .collect(),
        }
    }

    /// 已构建的树的数量
    pub fn tree_count(&self) -> usize {
        self.trees.len()
    }

    /// 已构建的树的旋转角度
    pub fn angles(&self) -> Vec<f64> {
        self.trees.iter().map(|t| t.angle).collect()
    }

    /// 为查询选择包围盒面积最小的树，相同时取先构建的树
    pub fn select(&self, query: &QuerySegment) -> Option<usize> {
        let mut best: Option<(usize, f64)> = None;
        for (index, tree) in self.trees.iter().enumerate() {
            let area = minkowski_box(query, tree.angle).area();
            match best {
                Some((_, best_area)) if area >= best_area => {}
                _ => best = Some((index, area)),
            }
        }
        best.map(|(index, _)| index)
    }

    /// 第 `tree` 棵树下查询盒的面积
    pub fn query_area(&self, tree: usize, query: &QuerySegment) -> Option<f64> {
        self.trees
            .get(tree)
            .map(|t| minkowski_box(query, t.angle).area())
    }

    /// 查询候选热像素（中心下标），结果升序且不重复
    pub fn query(&self, query: &QuerySegment) -> Vec<usize> {
        let mut out = Vec::new();
        if let Some(index) = self.select(query) {
            self.trees[index].query(query, &mut out);
        }
        out.sort_unstable();
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use std::f64::consts::{FRAC_PI_4, SQRT_2};

    fn grid_points(n: i64) -> Vec<Point2<f64>> {
        let mut points = Vec::new();
        for i in -n..=n {
            for j in -n..=n {
                points.push(Point2::new(i as f64, j as f64));
            }
        }
        points
    }

    #[test]
    fn test_kd_tree_range_query() {
        let points = grid_points(10);
        let entries = points.iter().enumerate().map(|(i, p)| (*p, i)).collect();
        let tree = KdTree::build(entries);
        assert_eq!(tree.len(), 441);

        let rect = Aabb::new(Point2::new(-1.5, 2.0), Point2::new(1.5, 4.0));
        let mut out = Vec::new();
        tree.query_rect(&rect, &mut out);
        out.sort_unstable();

        let expected: Vec<usize> = points
            .iter()
            .enumerate()
            .filter(|(_, p)| rect.contains(p))
            .map(|(i, _)| i)
            .collect();
        assert_eq!(out, expected);
        assert_eq!(out.len(), 9);
    }

    #[test]
    fn test_empty_tree() {
        let tree = KdTree::build(Vec::new());
        let mut out = Vec::new();
        tree.query_rect(&Aabb::new(Point2::new(-1e9, -1e9), Point2::new(1e9, 1e9)), &mut out);
        assert!(out.is_empty());
        assert!(tree.is_empty());
    }

    #[test]
    fn test_candidate_angles() {
        let angles = Cluster::candidate_angles(4);
        assert_eq!(angles.len(), 4);
        assert_eq!(angles[0], 0.0);
        assert_abs_diff_eq!(angles[2], FRAC_PI_4, epsilon = 1e-12);
        assert!(angles.iter().all(|a| *a < FRAC_PI_2));
    }

    #[test]
    fn test_minkowski_box_axis_aligned() {
        let q = QuerySegment::new(Point2::new(0.0, 0.0), Point2::new(4.0, 0.0));
        let bbox = minkowski_box(&q, 0.0);
        assert_abs_diff_eq!(bbox.min.x, -0.5, epsilon = 1e-6);
        assert_abs_diff_eq!(bbox.max.x, 4.5, epsilon = 1e-6);
        assert_abs_diff_eq!(bbox.height(), 1.0, epsilon = 1e-6);
    }

    #[test]
    fn test_minkowski_box_rotated() {
        let q = QuerySegment::new(Point2::new(0.0, 0.0), Point2::new(4.0, 4.0));
        assert_abs_diff_eq!(minkowski_box(&q, 0.0).area(), 25.0, epsilon = 1e-6);

        // 旋转 45° 后像素在两个方向上各占 √2
        let rotated = minkowski_box(&q, FRAC_PI_4);
        assert_abs_diff_eq!(rotated.width(), 4.0 * SQRT_2 + SQRT_2, epsilon = 1e-6);
        assert_abs_diff_eq!(rotated.height(), SQRT_2, epsilon = 1e-6);
    }

    #[test]
    fn test_diagonal_query_prefers_rotated_tree() {
        let centers = grid_points(5);
        let queries = vec![QuerySegment::new(Point2::new(-4.0, -4.0), Point2::new(4.0, 4.0))];
        let estimator = PreferenceCountEstimator::default();
        let cluster = Cluster::build(&centers, &queries, 2, &estimator, 0.0);
        assert_eq!(cluster.tree_count(), 2);

        let chosen = cluster.select(&queries[0]).unwrap();
        assert_abs_diff_eq!(cluster.angles()[chosen], FRAC_PI_4, epsilon = 1e-12);

        // 旋转后的查询盒包含线段覆盖范围内的对角中心，不含两端之外的 (±5, ±5)
        let found = cluster.query(&queries[0]);
        for (index, c) in centers.iter().enumerate() {
            if c.x == c.y && c.x.abs() <= 4.0 {
                assert!(found.contains(&index));
            }
        }
        for corner in [Point2::new(5.0, 5.0), Point2::new(-5.0, -5.0)] {
            let index = centers.iter().position(|c| *c == corner).unwrap();
            assert!(!found.contains(&index));
        }
    }

    #[test]
    fn test_estimator_skips_unused_rotation() {
        let centers = grid_points(3);
        let queries: Vec<QuerySegment> = (0..20)
            .map(|k| QuerySegment::new(Point2::new(0.0, k as f64), Point2::new(10.0, k as f64)))
            .collect();
        let estimator = PreferenceCountEstimator::default();
        let cluster = Cluster::build(&centers, &queries, 2, &estimator, 0.05);
        assert_eq!(cluster.angles(), vec![0.0]);
    }

    #[test]
    fn test_single_tree_always_built() {
        let cluster = Cluster::build(&[], &[], 1, &PreferenceCountEstimator::default(), 0.5);
        assert_eq!(cluster.tree_count(), 1);
        let q = QuerySegment::new(Point2::new(0.0, 0.0), Point2::new(1.0, 1.0));
        assert!(cluster.query(&q).is_empty());
    }
}
