//! 吸附取整引擎
//!
//! 支持两种模式：
//! - 吸附取整 (SR)：每条线段替换为它依次经过的热像素中心组成的折线
//! - 迭代吸附取整 (ISR)：在 SR 基础上反复加入热像素，直到没有边穿过端点以外的热像素，
//!   从而每个顶点与非关联边的距离不小于半个像素宽度，且结果再次取整时保持不变
//!
//! 流程：枚举顶点 → 建立热像素集合 → 构建 kd 树簇 → 逐线段查询并排序
//! → （ISR）检查间隔、加入像素、重建索引、重新取整 → 映射输出坐标。

use crate::error::{SnapError, SnapResult};
use crate::geometry::{Polyline, Segment2};
use crate::kernel::{try_sort_by, Field, Kernel};
use crate::output::{OutputMapper, OutputMode};
use crate::geometry::Point2;
use crate::pixel::{HotPixelSet, ParamInterval, Pixel, PixelGrid};
use crate::spatial::{Cluster, PreferenceCountEstimator, QuerySegment, TreeCostEstimator};
use crate::vertex::VertexEnumerator;
use num_traits::One;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

/// 加热像素时在违规顶点周围搜索的窗口半径（像素）
const CANDIDATE_RADIUS: i64 = 3;

/// 相遇像素及其参数区间
type Met<T> = (ParamInterval<T>, Pixel);

/// 吸附取整配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SnapConfig {
    /// 执行迭代吸附取整（ISR），否则只做一次 SR
    pub do_isr: bool,
    /// 输出整数网格坐标，否则输出原始尺度坐标
    pub integer_output: bool,
    /// 旋转 kd 树数量上限
    pub number_of_kd_trees: u32,
    /// ISR 细化轮数上限，超过时报告未收敛
    pub max_isr_rounds: Option<usize>,
    /// 预测使用比例低于此值的旋转角度不建树
    pub min_tree_share: f64,
    /// 代价估计时最多抽样的线段数
    pub estimator_sample_limit: usize,
}

impl Default for SnapConfig {
    fn default() -> Self {
        Self {
            do_isr: true,
            integer_output: true,
            number_of_kd_trees: 1,
            max_isr_rounds: None,
            min_tree_share: 0.05,
            estimator_sample_limit: 1024,
        }
    }
}

impl SnapConfig {
    /// 检查与像素宽度无关的前置条件
    pub fn validate(&self) -> SnapResult<()> {
        if self.number_of_kd_trees == 0 {
            return Err(SnapError::InvalidTreeCount);
        }
        Ok(())
    }
}

/// 取整结果
#[derive(Debug, Clone)]
pub struct SnapReport<T> {
    /// 每条输入线段对应一条折线，顺序与输入一致
    pub polylines: Vec<Polyline<T>>,
    /// 最终的热像素（升序）
    pub hot_pixels: Vec<Pixel>,
    /// ISR 细化轮数
    pub isr_rounds: usize,
    /// ISR 额外加入的热像素数
    pub added_pixels: usize,
}

/// 第 `segment` 条折线的第 `edge` 条边穿过了不是其端点的热像素 `vertex`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Violation {
    segment: usize,
    edge: usize,
    vertex: Pixel,
}

/// 吸附取整器
///
/// 每次 `run` 独占自己的热像素集合和 kd 树簇，不保留跨调用状态。
pub struct SnapRounder<'a, K: Kernel> {
    kernel: &'a K,
    config: SnapConfig,
    estimator: Box<dyn TreeCostEstimator>,
}

impl<'a, K: Kernel> SnapRounder<'a, K> {
    pub fn new(kernel: &'a K, config: SnapConfig) -> Self {
        let estimator = Box::new(PreferenceCountEstimator {
            sample_limit: config.estimator_sample_limit,
        });
        Self {
            kernel,
            config,
            estimator,
        }
    }

    /// 替换旋转树的代价估计器
    pub fn with_estimator(mut self, estimator: impl TreeCostEstimator + 'static) -> Self {
        self.estimator = Box::new(estimator);
        self
    }

    /// 获取配置
    pub fn config(&self) -> &SnapConfig {
        &self.config
    }

    /// 执行取整
    pub fn run(
        &self,
        segments: &[Segment2<K::FT>],
        pixel_size: K::FT,
    ) -> SnapResult<SnapReport<K::FT>> {
        self.config.validate()?;
        if self.kernel.sign(&pixel_size).ok() != Some(Ordering::Greater) {
            return Err(SnapError::InvalidPixelSize(format!("{:?}", pixel_size)));
        }

        let grid = PixelGrid::new(pixel_size.clone());
        let mapper = OutputMapper::new(OutputMode::from_flag(self.config.integer_output), pixel_size);

        if segments.is_empty() {
            return Ok(SnapReport {
                polylines: Vec::new(),
                hot_pixels: Vec::new(),
                isr_rounds: 0,
                added_pixels: 0,
            });
        }

        let vertices = VertexEnumerator::new(self.kernel).enumerate(segments)?;
        let mut hot = HotPixelSet::from_vertices(&grid, &vertices)?;
        let initial_hot = hot.len();
        debug!("{} vertices fall into {} hot pixels", vertices.len(), initial_hot);

        let queries = segments
            .iter()
            .map(|s| query_segment(&grid, s))
            .collect::<SnapResult<Vec<_>>>()?;

        let mut rounds = 0;
        let routes = loop {
            // 本轮的热像素快照与索引在查询期间保持不变
            let pixels = hot.to_vec();
            let cluster = self.build_cluster(&pixels, &queries);
            let routes = self.round_all(&grid, segments, &queries, &vertices, &pixels, &cluster)?;

            if !self.config.do_isr {
                break routes;
            }

            let violations = self.find_violations(&routes, &pixels, &cluster)?;
            if violations.is_empty() {
                break routes;
            }

            rounds += 1;
            if let Some(limit) = self.config.max_isr_rounds {
                if rounds > limit {
                    warn!(
                        "ISR stopped after {} rounds with {} violations left",
                        limit,
                        violations.len()
                    );
                    return Err(SnapError::IsrNotConverged { rounds: limit });
                }
            }

            let additions = self.pixels_to_add(&grid, segments, &vertices, &routes, &hot, &violations)?;
            let before = hot.len();
            for pixel in additions {
                hot.insert(pixel);
            }
            debug!(
                "ISR round {}: {} violations, {} new hot pixels",
                rounds,
                violations.len(),
                hot.len() - before
            );

            if hot.len() == before {
                return Err(SnapError::IsrNotConverged { rounds });
            }
        };

        info!(
            "Snap rounding finished: {} segments, {} hot pixels ({} added by ISR), {} ISR rounds",
            segments.len(),
            hot.len(),
            hot.len() - initial_hot,
            rounds
        );

        Ok(SnapReport {
            polylines: mapper.map_all(&routes),
            hot_pixels: hot.to_vec(),
            isr_rounds: rounds,
            added_pixels: hot.len() - initial_hot,
        })
    }

    fn build_cluster(&self, pixels: &[Pixel], queries: &[QuerySegment]) -> Cluster {
        let centers: Vec<_> = pixels.iter().map(Pixel::grid_point_f64).collect();
        Cluster::build(
            &centers,
            queries,
            self.config.number_of_kd_trees,
            self.estimator.as_ref(),
            self.config.min_tree_share,
        )
    }

    /// SR：所有线段并行查询同一个不可变索引
    fn round_all(
        &self,
        grid: &PixelGrid<K::FT>,
        segments: &[Segment2<K::FT>],
        queries: &[QuerySegment],
        vertices: &[Point2<K::FT>],
        pixels: &[Pixel],
        cluster: &Cluster,
    ) -> SnapResult<Vec<Vec<Pixel>>> {
        segments
            .par_iter()
            .zip(queries.par_iter())
            .map(|(segment, query)| self.round_segment(grid, segment, query, vertices, pixels, cluster))
            .collect()
    }

    /// 单条线段经过的热像素，按经过顺序排列
    fn round_segment(
        &self,
        grid: &PixelGrid<K::FT>,
        segment: &Segment2<K::FT>,
        query: &QuerySegment,
        vertices: &[Point2<K::FT>],
        pixels: &[Pixel],
        cluster: &Cluster,
    ) -> SnapResult<Vec<Pixel>> {
        let mut met = Vec::new();
        for index in cluster.query(query) {
            let pixel = pixels[index];
            if let Some(interval) = grid.meet(self.kernel, segment, pixel, vertices)? {
                met.push((interval, pixel));
            }
        }

        try_sort_by(&mut met, |a, b| self.traversal_order(a, b))?;

        let mut route: Vec<Pixel> = met.into_iter().map(|(_, pixel)| pixel).collect();
        route.dedup();
        Ok(route)
    }

    /// 按经过顺序比较两个相遇像素：先比进入参数，再比像素序号
    fn traversal_order(&self, a: &Met<K::FT>, b: &Met<K::FT>) -> SnapResult<Ordering> {
        Ok(a.0.compare_entry(self.kernel, &b.0)?.then(a.1.cmp(&b.1)))
    }

    /// 在像素单位下精确检查每条边是否穿过端点以外的热像素
    ///
    /// 穿过像素的开方形内部比进入中心半像素的圆盘更严格，所以通过检查的结果同时满足
    /// 半像素间隔。
    fn find_violations(
        &self,
        routes: &[Vec<Pixel>],
        pixels: &[Pixel],
        cluster: &Cluster,
    ) -> SnapResult<Vec<Violation>> {
        // 相同的边只检查一次，记录第一次出现的位置
        let mut edges: BTreeMap<(Pixel, Pixel), (usize, usize)> = BTreeMap::new();
        for (segment, route) in routes.iter().enumerate() {
            for (edge, pair) in route.windows(2).enumerate() {
                let key = if pair[0] <= pair[1] {
                    (pair[0], pair[1])
                } else {
                    (pair[1], pair[0])
                };
                edges.entry(key).or_insert((segment, edge));
            }
        }
        let edges: Vec<_> = edges.into_iter().collect();

        let unit = PixelGrid::new(K::FT::one());
        let found = edges
            .par_iter()
            .map(|((a, b), (segment, edge))| -> SnapResult<Vec<Violation>> {
                // 相邻像素中心之间的边只在两端像素内留下正长度
                if a.squared_distance(b) <= 2 {
                    return Ok(Vec::new());
                }

                let query = QuerySegment::new(a.grid_point_f64(), b.grid_point_f64());
                let exact = Segment2::new(a.grid_point(), b.grid_point());
                let mut out = Vec::new();
                for index in cluster.query(&query) {
                    let vertex = pixels[index];
                    if vertex == *a || vertex == *b {
                        continue;
                    }
                    if unit.passes_through(self.kernel, &exact, vertex)? {
                        out.push(Violation {
                            segment: *segment,
                            edge: *edge,
                            vertex,
                        });
                    }
                }
                Ok(out)
            })
            .collect::<SnapResult<Vec<_>>>()?;

        Ok(found.into_iter().flatten().collect())
    }

    /// 为每个违规选出要加热的像素
    ///
    /// 候选像素是原始线段在该边两端热像素之间经过的冷像素，取中心离违规顶点最近的一个，
    /// 距离相同时取序号较小者。
    fn pixels_to_add(
        &self,
        grid: &PixelGrid<K::FT>,
        segments: &[Segment2<K::FT>],
        vertices: &[Point2<K::FT>],
        routes: &[Vec<Pixel>],
        hot: &HotPixelSet,
        violations: &[Violation],
    ) -> SnapResult<Vec<Pixel>> {
        let additions = violations
            .par_iter()
            .map(|violation| self.nearest_candidate(grid, segments, vertices, routes, hot, violation))
            .collect::<SnapResult<Vec<_>>>()?;

        Ok(additions.into_iter().flatten().collect())
    }

    /// 单个违规的候选像素
    ///
    /// 先只裁剪违规顶点周围的窗口；窗口内最近的候选落在窗口的内切圆里时，它就是整条线段上
    /// 最近的候选，否则退回逐列遍历整条线段。
    fn nearest_candidate(
        &self,
        grid: &PixelGrid<K::FT>,
        segments: &[Segment2<K::FT>],
        vertices: &[Point2<K::FT>],
        routes: &[Vec<Pixel>],
        hot: &HotPixelSet,
        violation: &Violation,
    ) -> SnapResult<Option<Pixel>> {
        let segment = &segments[violation.segment];
        let route = &routes[violation.segment];
        let (a, b) = (route[violation.edge], route[violation.edge + 1]);
        let (Some(from), Some(to)) = (
            grid.meet(self.kernel, segment, a, vertices)?,
            grid.meet(self.kernel, segment, b, vertices)?,
        ) else {
            debug!("Route pixels {:?}-{:?} not met by segment {}", a, b, violation.segment);
            return Ok(None);
        };
        let (from, to) = ((from, a), (to, b));

        let target = violation.vertex;
        let mut best: Option<Pixel> = None;
        let consider = |best: &mut Option<Pixel>, entry: Met<K::FT>| -> SnapResult<()> {
            let pixel = entry.1;
            if hot.contains(&pixel)
                || self.traversal_order(&entry, &from)? != Ordering::Greater
                || self.traversal_order(&entry, &to)? != Ordering::Less
            {
                return Ok(());
            }
            let key = (pixel.squared_distance(&target), pixel);
            if best.map_or(true, |p| key < (p.squared_distance(&target), p)) {
                *best = Some(pixel);
            }
            Ok(())
        };

        let window = |k: i64| k.saturating_sub(CANDIDATE_RADIUS)..=k.saturating_add(CANDIDATE_RADIUS);
        for i in window(target.i) {
            for j in window(target.j) {
                let pixel = Pixel::new(i, j);
                if let Some(interval) = grid.meet(self.kernel, segment, pixel, vertices)? {
                    consider(&mut best, (interval, pixel))?;
                }
            }
        }

        let radius = i128::from(CANDIDATE_RADIUS);
        if let Some(pixel) = best {
            if pixel.squared_distance(&target) <= radius * radius {
                return Ok(Some(pixel));
            }
        }

        for entry in grid.traversed(self.kernel, segment, vertices)? {
            consider(&mut best, entry)?;
        }
        Ok(best)
    }
}

/// 线段在像素单位下的浮点近似，供索引查询
fn query_segment<T: Field>(grid: &PixelGrid<T>, segment: &Segment2<T>) -> SnapResult<QuerySegment> {
    let scaled = segment.div_by(grid.width());
    match (scaled.source.to_f64(), scaled.target.to_f64()) {
        (Some(source), Some(target)) => Ok(QuerySegment::new(source, target)),
        _ => Err(SnapError::CoordinateOverflow(format!("{:?}", segment))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Point2;
    use crate::kernel::{ExactKernel, FloatKernel};
    use num_bigint::BigInt;
    use num_rational::BigRational;

    fn rat(n: i64, d: i64) -> BigRational {
        BigRational::new(BigInt::from(n), BigInt::from(d))
    }

    fn seg(x1: (i64, i64), y1: (i64, i64), x2: (i64, i64), y2: (i64, i64)) -> Segment2<BigRational> {
        Segment2::new(
            Point2::new(rat(x1.0, x1.1), rat(y1.0, y1.1)),
            Point2::new(rat(x2.0, x2.1), rat(y2.0, y2.1)),
        )
    }

    fn sr_config() -> SnapConfig {
        SnapConfig {
            do_isr: false,
            ..Default::default()
        }
    }

    #[test]
    fn test_default_config() {
        let config = SnapConfig::default();
        assert!(config.do_isr);
        assert!(config.integer_output);
        assert_eq!(config.number_of_kd_trees, 1);
        assert!(config.max_isr_rounds.is_none());
    }

    #[test]
    fn test_config_from_partial_json() {
        let config: SnapConfig = serde_json::from_str(r#"{ "do_isr": false, "number_of_kd_trees": 3 }"#).unwrap();
        assert!(!config.do_isr);
        assert!(config.integer_output);
        assert_eq!(config.number_of_kd_trees, 3);
    }

    #[test]
    fn test_rejects_bad_preconditions() {
        let k = ExactKernel;
        let segments = vec![seg((0, 1), (0, 1), (1, 1), (1, 1))];

        let err = SnapRounder::new(&k, SnapConfig::default())
            .run(&segments, rat(0, 1))
            .unwrap_err();
        assert!(matches!(err, SnapError::InvalidPixelSize(_)));

        let err = SnapRounder::new(&k, SnapConfig::default())
            .run(&segments, rat(-1, 2))
            .unwrap_err();
        assert!(matches!(err, SnapError::InvalidPixelSize(_)));

        let config = SnapConfig {
            number_of_kd_trees: 0,
            ..Default::default()
        };
        let err = SnapRounder::new(&k, config).run(&segments, rat(1, 1)).unwrap_err();
        assert_eq!(err, SnapError::InvalidTreeCount);
    }

    #[test]
    fn test_nan_pixel_size_rejected() {
        let k = FloatKernel;
        let segments = vec![Segment2::new(Point2::new(0.0, 0.0), Point2::new(1.0, 1.0))];
        let err = SnapRounder::new(&k, SnapConfig::default())
            .run(&segments, f64::NAN)
            .unwrap_err();
        assert!(matches!(err, SnapError::InvalidPixelSize(_)));
    }

    #[test]
    fn test_degenerate_segment_single_point() {
        let k = ExactKernel;
        let segments = vec![seg((3, 10), (-4, 10), (3, 10), (-4, 10))];
        let report = SnapRounder::new(&k, sr_config()).run(&segments, rat(1, 1)).unwrap();
        assert_eq!(report.polylines, vec![vec![Point2::from_ints(0, 0)]]);
    }

    #[test]
    fn test_short_segment_within_one_pixel_collapses() {
        let k = ExactKernel;
        let segments = vec![seg((1, 10), (1, 10), (3, 10), (2, 10))];
        let report = SnapRounder::new(&k, SnapConfig::default()).run(&segments, rat(1, 1)).unwrap();
        assert_eq!(report.polylines[0].len(), 1);
    }

    #[test]
    fn test_route_skips_cold_pixels() {
        let k = ExactKernel;
        // 水平线段只经过两端的热像素
        let segments = vec![seg((0, 1), (0, 1), (10, 1), (0, 1))];
        let report = SnapRounder::new(&k, sr_config()).run(&segments, rat(1, 1)).unwrap();
        assert_eq!(
            report.polylines[0],
            vec![Point2::from_ints(0, 0), Point2::from_ints(10, 0)]
        );
        assert_eq!(report.hot_pixels.len(), 2);
    }

    #[test]
    fn test_round_ceiling_reports_failure() {
        let k = ExactKernel;
        let segments = vec![
            seg((0, 1), (0, 1), (10, 1), (14, 10)),
            seg((5, 1), (0, 1), (52, 10), (1, 10)),
        ];
        let config = SnapConfig {
            max_isr_rounds: Some(0),
            ..Default::default()
        };
        let err = SnapRounder::new(&k, config).run(&segments, rat(1, 1)).unwrap_err();
        assert_eq!(err, SnapError::IsrNotConverged { rounds: 0 });
    }

    struct AlwaysEverything;

    impl TreeCostEstimator for AlwaysEverything {
        fn predicted_share(&self, _: &[QuerySegment], _: f64, _: &[f64]) -> f64 {
            1.0
        }
    }

    #[test]
    fn test_custom_estimator_same_result() {
        let k = ExactKernel;
        let segments = vec![
            seg((0, 1), (0, 1), (7, 1), (3, 1)),
            seg((0, 1), (3, 1), (7, 1), (0, 1)),
            seg((1, 2), (5, 1), (13, 2), (5, 1)),
        ];
        let single = SnapRounder::new(&k, SnapConfig::default())
            .run(&segments, rat(1, 1))
            .unwrap();
        let config = SnapConfig {
            number_of_kd_trees: 4,
            ..Default::default()
        };
        let clustered = SnapRounder::new(&k, config)
            .with_estimator(AlwaysEverything)
            .run(&segments, rat(1, 1))
            .unwrap();
        assert_eq!(single.polylines, clustered.polylines);
        assert_eq!(single.hot_pixels, clustered.hot_pixels);
    }
}
