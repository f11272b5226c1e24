//! ZSNAP 吸附取整引擎
//!
//! 把一组任意位置的平面线段转换为落在均匀像素网格上的折线。
//!
//! # 架构设计
//!
//! - `kernel`: 几何内核（精确有理数 / 浮点），提供比较、求交与距离
//! - `vertex`: 排列顶点枚举，确定热像素
//! - `pixel`: 像素网格、半开裁剪与热像素集合
//! - `spatial`: 旋转 kd 树簇，加速"线段经过哪些热像素"的查询
//! - `snap`: SR / ISR 主流程
//! - `output`: 整数网格或原始尺度的输出映射
//! - `check`: 输出间隔校验
//!
//! # 示例
//!
//! ```rust
//! use zsnap_core::prelude::*;
//!
//! let segments = vec![
//!     Segment2::new(Point2::new(0.0, 0.0), Point2::new(10.0, 10.0)),
//!     Segment2::new(Point2::new(0.0, 10.0), Point2::new(10.0, 0.0)),
//! ];
//! let polylines = snap_rounding_2::<FloatKernel>(&segments, 1.0, true, true, 1).unwrap();
//! assert_eq!(polylines.len(), 2);
//! assert_eq!(polylines[0][1], Point2::new(5.0, 5.0));
//! ```

pub mod check;
pub mod error;
pub mod geometry;
pub mod kernel;
pub mod output;
pub mod pixel;
pub mod snap;
pub mod spatial;
pub mod vertex;

use error::SnapResult;
use geometry::{Polyline, Segment2};
use kernel::Kernel;
use snap::{SnapConfig, SnapRounder};

/// 对线段集合执行吸附取整，输出与输入一一对应的折线
pub fn snap_rounding<K: Kernel>(
    kernel: &K,
    segments: &[Segment2<K::FT>],
    pixel_size: K::FT,
    config: &SnapConfig,
) -> SnapResult<Vec<Polyline<K::FT>>> {
    let report = SnapRounder::new(kernel, config.clone()).run(segments, pixel_size)?;
    Ok(report.polylines)
}

/// 以位置参数调用的吸附取整入口
///
/// 其余配置取默认值。
pub fn snap_rounding_2<K: Kernel + Default>(
    segments: &[Segment2<K::FT>],
    pixel_size: K::FT,
    do_isr: bool,
    integer_output: bool,
    number_of_kd_trees: u32,
) -> SnapResult<Vec<Polyline<K::FT>>> {
    let config = SnapConfig {
        do_isr,
        integer_output,
        number_of_kd_trees,
        ..Default::default()
    };
    snap_rounding(&K::default(), segments, pixel_size, &config)
}

pub mod prelude {
    //! 常用类型的便捷导入
    pub use crate::check::{separation_violations, SeparationViolation};
    pub use crate::error::{SnapError, SnapResult};
    pub use crate::geometry::{Point2, Polyline, Segment2, SegmentIntersection};
    pub use crate::kernel::{ExactKernel, Field, FloatKernel, Kernel};
    pub use crate::output::{OutputMapper, OutputMode};
    pub use crate::pixel::{HotPixelSet, Pixel, PixelGrid};
    pub use crate::snap::{SnapConfig, SnapReport, SnapRounder};
    pub use crate::spatial::{Cluster, PreferenceCountEstimator, QuerySegment, TreeCostEstimator};
    pub use crate::{snap_rounding, snap_rounding_2};
}
