//! 像素网格
//!
//! 平面被宽度为 `w` 的正方形像素铺满，原点位于某个像素的中心：
//! 像素 `(i, j)` 的中心为 `(i·w, j·w)`，覆盖半开区域
//! `[(i-½)w, (i+½)w) × [(j-½)w, (j+½)w)`。半开约定保证每个点恰好属于一个像素，
//! 也保证一条线段经过的像素按参数区间互不重叠。
//!
//! 线段与像素相遇：线段在像素内留下正长度的一段，或者只接触像素一点而该点是顶点。
//! 斜穿格点的线段因此不会与只占据该格点的像素相遇，取整后的折线再次取整时保持不变。

use crate::error::{SnapError, SnapResult};
use crate::geometry::{Point2, Segment2};
use crate::kernel::{try_sort_by, Field, Kernel};
use num_traits::{One, Zero};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeSet;

/// 像素坐标
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Pixel {
    pub i: i64,
    pub j: i64,
}

impl Pixel {
    pub fn new(i: i64, j: i64) -> Self {
        Self { i, j }
    }

    /// 像素中心（原始尺度）
    pub fn center<T: Field>(&self, width: &T) -> Point2<T> {
        Point2::<T>::from_ints(self.i, self.j).mul_by(width)
    }

    /// 像素中心（像素单位，即整数网格）
    pub fn grid_point<T: Field>(&self) -> Point2<T> {
        Point2::from_ints(self.i, self.j)
    }

    /// 像素中心的浮点坐标（像素单位）
    pub fn grid_point_f64(&self) -> nalgebra::Point2<f64> {
        nalgebra::Point2::new(self.i as f64, self.j as f64)
    }

    /// 与另一像素中心的平方距离（像素单位）
    pub fn squared_distance(&self, other: &Pixel) -> i128 {
        let di = self.i as i128 - other.i as i128;
        let dj = self.j as i128 - other.j as i128;
        di * di + dj * dj
    }
}

/// 参数区间的一端
#[derive(Debug, Clone)]
struct Bound<T> {
    value: T,
    open: bool,
}

/// 线段被裁剪后的参数区间
#[derive(Debug, Clone, PartialEq)]
pub struct ParamInterval<T> {
    /// 下确界（进入参数）
    pub lower: T,
    /// 下确界是否取不到
    pub lower_open: bool,
    /// 上确界（离开参数）
    pub upper: T,
}

impl<T: Field> ParamInterval<T> {
    /// 按进入位置比较：下确界相同时，闭端先于开端
    pub fn compare_entry<K: Kernel<FT = T>>(&self, kernel: &K, other: &Self) -> SnapResult<Ordering> {
        Ok(kernel
            .compare(&self.lower, &other.lower)?
            .then(self.lower_open.cmp(&other.lower_open)))
    }

    /// 区间是否退化为单个参数
    pub fn is_point<K: Kernel<FT = T>>(&self, kernel: &K) -> SnapResult<bool> {
        Ok(kernel.compare(&self.lower, &self.upper)? == Ordering::Equal)
    }
}

/// 像素网格
#[derive(Debug, Clone)]
pub struct PixelGrid<T> {
    width: T,
}

impl<T: Field> PixelGrid<T> {
    /// 创建网格，宽度的正负由调用方检查
    pub fn new(width: T) -> Self {
        Self { width }
    }

    /// 像素宽度
    pub fn width(&self) -> &T {
        &self.width
    }

    /// 单个坐标所在的像素序号：`floor(v / w + 1/2)`
    pub fn pixel_index(&self, value: &T) -> SnapResult<i64> {
        let scaled = value.clone() / self.width.clone() + T::half();
        scaled
            .floor_to_i64()
            .ok_or_else(|| SnapError::CoordinateOverflow(format!("{:?}", value)))
    }

    /// 点所在的像素
    pub fn pixel_of(&self, p: &Point2<T>) -> SnapResult<Pixel> {
        Ok(Pixel::new(self.pixel_index(&p.x)?, self.pixel_index(&p.y)?))
    }

    /// 像素在某一轴上的半开范围 `[(k-½)w, (k+½)w)`
    fn axis_range(&self, k: i64) -> (T, T) {
        let k = T::from_int(k);
        let half = T::half();
        (
            (k.clone() - half.clone()) * self.width.clone(),
            (k + half) * self.width.clone(),
        )
    }

    /// 线段与像素半开区域的交集的参数区间
    ///
    /// 线段不经过该像素时返回 `None`。
    pub fn clip<K: Kernel<FT = T>>(
        &self,
        kernel: &K,
        segment: &Segment2<T>,
        pixel: Pixel,
    ) -> SnapResult<Option<ParamInterval<T>>> {
        let x_range = self.axis_range(pixel.i);
        let y_range = self.axis_range(pixel.j);
        clip_to_box(kernel, segment, Some(&x_range), Some(&y_range))
    }

    /// 线段在像素内是否留下正长度的一段
    pub fn passes_through<K: Kernel<FT = T>>(
        &self,
        kernel: &K,
        segment: &Segment2<T>,
        pixel: Pixel,
    ) -> SnapResult<bool> {
        match self.clip(kernel, segment, pixel)? {
            Some(interval) => Ok(!interval.is_point(kernel)?),
            None => Ok(false),
        }
    }

    /// 线段与像素相遇时返回参数区间
    ///
    /// `vertices` 须按 `compare_xy` 升序排列。
    pub fn meet<K: Kernel<FT = T>>(
        &self,
        kernel: &K,
        segment: &Segment2<T>,
        pixel: Pixel,
        vertices: &[Point2<T>],
    ) -> SnapResult<Option<ParamInterval<T>>> {
        let Some(interval) = self.clip(kernel, segment, pixel)? else {
            return Ok(None);
        };
        if !interval.is_point(kernel)? {
            return Ok(Some(interval));
        }
        let touch = segment.point_at(&interval.lower);
        Ok(contains_sorted(kernel, vertices, &touch)?.then_some(interval))
    }

    /// 线段经过的全部像素（不论冷热），按进入参数排序
    ///
    /// 逐列裁剪：先求线段在每一列内的参数区间，再检查该区间覆盖的行。
    pub fn traversed<K: Kernel<FT = T>>(
        &self,
        kernel: &K,
        segment: &Segment2<T>,
        vertices: &[Point2<T>],
    ) -> SnapResult<Vec<(ParamInterval<T>, Pixel)>> {
        if segment.is_degenerate() {
            let whole = ParamInterval {
                lower: T::zero(),
                lower_open: false,
                upper: T::one(),
            };
            return Ok(vec![(whole, self.pixel_of(&segment.source)?)]);
        }

        let first = self.pixel_index(&segment.source.x)?;
        let last = self.pixel_index(&segment.target.x)?;
        let (col_lo, col_hi) = (first.min(last), first.max(last));

        let mut met = Vec::new();
        for i in col_lo..=col_hi {
            let x_range = self.axis_range(i);
            let Some(column) = clip_to_box(kernel, segment, Some(&x_range), None)? else {
                continue;
            };

            let y0 = segment.point_at(&column.lower).y;
            let y1 = segment.point_at(&column.upper).y;
            let r0 = self.pixel_index(&y0)?;
            let r1 = self.pixel_index(&y1)?;

            for j in r0.min(r1)..=r0.max(r1) {
                let pixel = Pixel::new(i, j);
                if let Some(interval) = self.meet(kernel, segment, pixel, vertices)? {
                    met.push((interval, pixel));
                }
            }
        }

        try_sort_by(&mut met, |a, b| Ok(a.0.compare_entry(kernel, &b.0)?.then(a.1.cmp(&b.1))))?;
        Ok(met)
    }
}

/// 在按 `compare_xy` 升序排列的点集中查找
fn contains_sorted<K: Kernel>(
    kernel: &K,
    sorted: &[Point2<K::FT>],
    p: &Point2<K::FT>,
) -> SnapResult<bool> {
    let (mut lo, mut hi) = (0, sorted.len());
    while lo < hi {
        let mid = lo + (hi - lo) / 2;
        match kernel.compare_xy(&sorted[mid], p)? {
            Ordering::Less => lo = mid + 1,
            Ordering::Greater => hi = mid,
            Ordering::Equal => return Ok(true),
        }
    }
    Ok(false)
}

/// 用轴对齐半开盒 `[x0, x1) × [y0, y1)` 裁剪线段（Liang–Barsky）
///
/// 缺省的轴不做约束。返回参数区间的下确界与上确界。
pub fn clip_to_box<K: Kernel>(
    kernel: &K,
    segment: &Segment2<K::FT>,
    x_range: Option<&(K::FT, K::FT)>,
    y_range: Option<&(K::FT, K::FT)>,
) -> SnapResult<Option<ParamInterval<K::FT>>> {
    let mut lower = Bound {
        value: K::FT::zero(),
        open: false,
    };
    let mut upper = Bound {
        value: K::FT::one(),
        open: false,
    };

    let (dx, dy) = segment.source.delta_to(&segment.target);
    let axes = [
        (x_range, &segment.source.x, &dx),
        (y_range, &segment.source.y, &dy),
    ];

    for (range, start, delta) in axes {
        let Some((lo, hi)) = range else {
            continue;
        };
        if !clip_axis(kernel, start, delta, lo, hi, &mut lower, &mut upper)? {
            return Ok(None);
        }
    }

    let nonempty = match kernel.compare(&lower.value, &upper.value)? {
        Ordering::Less => true,
        Ordering::Equal => !lower.open && !upper.open,
        Ordering::Greater => false,
    };

    Ok(nonempty.then(|| ParamInterval {
        lower: lower.value,
        lower_open: lower.open,
        upper: upper.value,
    }))
}

/// 单轴约束 `lo <= start + t·delta < hi`
fn clip_axis<K: Kernel>(
    kernel: &K,
    start: &K::FT,
    delta: &K::FT,
    lo: &K::FT,
    hi: &K::FT,
    lower: &mut Bound<K::FT>,
    upper: &mut Bound<K::FT>,
) -> SnapResult<bool> {
    match kernel.sign(delta)? {
        Ordering::Equal => Ok(kernel.compare(lo, start)? != Ordering::Greater
            && kernel.compare(start, hi)? == Ordering::Less),
        Ordering::Greater => {
            let enter = (lo.clone() - start.clone()) / delta.clone();
            let leave = (hi.clone() - start.clone()) / delta.clone();
            tighten_lower(kernel, lower, enter, false)?;
            tighten_upper(kernel, upper, leave, true)?;
            Ok(true)
        }
        Ordering::Less => {
            let leave = (lo.clone() - start.clone()) / delta.clone();
            let enter = (hi.clone() - start.clone()) / delta.clone();
            tighten_upper(kernel, upper, leave, false)?;
            tighten_lower(kernel, lower, enter, true)?;
            Ok(true)
        }
    }
}

fn tighten_lower<K: Kernel>(
    kernel: &K,
    bound: &mut Bound<K::FT>,
    value: K::FT,
    open: bool,
) -> SnapResult<()> {
    match kernel.compare(&value, &bound.value)? {
        Ordering::Greater => *bound = Bound { value, open },
        Ordering::Equal => bound.open |= open,
        Ordering::Less => {}
    }
    Ok(())
}

fn tighten_upper<K: Kernel>(
    kernel: &K,
    bound: &mut Bound<K::FT>,
    value: K::FT,
    open: bool,
) -> SnapResult<()> {
    match kernel.compare(&value, &bound.value)? {
        Ordering::Less => *bound = Bound { value, open },
        Ordering::Equal => bound.open |= open,
        Ordering::Greater => {}
    }
    Ok(())
}

/// 热像素集合
///
/// 只增不减；迭代取整时由取整器独占。
#[derive(Debug, Clone, Default)]
pub struct HotPixelSet {
    pixels: BTreeSet<Pixel>,
}

impl HotPixelSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// 由顶点集合构造
    pub fn from_vertices<T: Field>(grid: &PixelGrid<T>, vertices: &[Point2<T>]) -> SnapResult<Self> {
        let mut set = Self::new();
        for v in vertices {
            set.insert(grid.pixel_of(v)?);
        }
        Ok(set)
    }

    /// 加入像素，返回是否为新像素
    pub fn insert(&mut self, pixel: Pixel) -> bool {
        self.pixels.insert(pixel)
    }

    pub fn contains(&self, pixel: &Pixel) -> bool {
        self.pixels.contains(pixel)
    }

    pub fn len(&self) -> usize {
        self.pixels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pixels.is_empty()
    }

    /// 按像素序号升序遍历
    pub fn iter(&self) -> impl Iterator<Item = &Pixel> {
        self.pixels.iter()
    }

    /// 有序快照，供索引使用
    pub fn to_vec(&self) -> Vec<Pixel> {
        self.pixels.iter().copied().collect()
    }
}
