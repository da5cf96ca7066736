pub mod geometry {
    use glam::DVec2;
    use serde::{Deserialize, Serialize};

    /// 二维地理坐标点，内部以 `glam::DVec2` 表示：x 为经度，y 为纬度（WGS84 度）。
    #[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
    pub struct Point2(pub DVec2);

    impl Point2 {
        #[inline]
        pub fn new(x: f64, y: f64) -> Self {
            Self(DVec2::new(x, y))
        }

        /// 按 (经度, 纬度) 顺序构造。
        #[inline]
        pub fn from_lon_lat(longitude: f64, latitude: f64) -> Self {
            Self::new(longitude, latitude)
        }

        #[inline]
        pub fn from_vec(vec: DVec2) -> Self {
            Self(vec)
        }

        #[inline]
        pub fn x(self) -> f64 {
            self.0.x
        }

        #[inline]
        pub fn y(self) -> f64 {
            self.0.y
        }

        #[inline]
        pub fn longitude(self) -> f64 {
            self.0.x
        }

        #[inline]
        pub fn latitude(self) -> f64 {
            self.0.y
        }

        #[inline]
        pub fn as_vec2(self) -> DVec2 {
            self.0
        }
    }

    /// 轴对齐边界框，写 Shapefile 头部与记录时需要。
    #[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
    pub struct Bounds2D {
        min: Point2,
        max: Point2,
    }

    impl Bounds2D {
        #[inline]
        pub fn empty() -> Self {
            Self {
                min: Point2::new(f64::INFINITY, f64::INFINITY),
                max: Point2::new(f64::NEG_INFINITY, f64::NEG_INFINITY),
            }
        }

        pub fn from_points<'a>(points: impl IntoIterator<Item = &'a Point2>) -> Self {
            let mut bounds = Self::empty();
            for point in points {
                bounds.include_point(*point);
            }
            bounds
        }

        #[inline]
        pub fn is_empty(&self) -> bool {
            self.min.x() > self.max.x() || self.min.y() > self.max.y()
        }

        pub fn include_point(&mut self, point: Point2) {
            if self.is_empty() {
                self.min = point;
                self.max = point;
                return;
            }
            let min_vec = self.min.as_vec2().min(point.as_vec2());
            let max_vec = self.max.as_vec2().max(point.as_vec2());
            self.min = Point2::from_vec(min_vec);
            self.max = Point2::from_vec(max_vec);
        }

        pub fn include_bounds(&mut self, other: &Bounds2D) {
            if other.is_empty() {
                return;
            }
            self.include_point(other.min);
            self.include_point(other.max);
        }

        /// 空边界框在文件中按全零写出。
        pub fn to_array_or_zero(&self) -> [f64; 4] {
            if self.is_empty() {
                [0.0; 4]
            } else {
                [self.min.x(), self.min.y(), self.max.x(), self.max.y()]
            }
        }
    }
}

pub mod feature {
    use serde::{Deserialize, Serialize};

    use crate::geometry::Point2;

    /// 至少两个点的折线，`name` 来自源文件名（不含扩展名）。
    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    pub struct Polyline {
        pub name: String,
        pub points: Vec<Point2>,
    }

    impl Polyline {
        pub fn new(name: impl Into<String>, points: Vec<Point2>) -> Self {
            Self {
                name: name.into(),
                points,
            }
        }
    }

    /// 多边形的一个环（部件），点序与源文件一致。
    #[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
    pub struct Ring {
        pub points: Vec<Point2>,
    }

    impl Ring {
        pub fn new(points: Vec<Point2>) -> Self {
            Self { points }
        }

        #[inline]
        pub fn is_closed(&self) -> bool {
            match (self.points.first(), self.points.last()) {
                (Some(first), Some(last)) => first == last,
                _ => false,
            }
        }

        /// 首尾不一致时追加首点；返回是否做了修补。
        pub fn close(&mut self) -> bool {
            match self.points.first().copied() {
                Some(first) if !self.is_closed() => {
                    self.points.push(first);
                    true
                }
                _ => false,
            }
        }
    }

    /// dBASE 字段类型。
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
    pub enum FieldKind {
        Character,
        Numeric,
        Float,
        Logical,
        Date,
    }

    impl FieldKind {
        pub fn from_code(code: u8) -> Option<Self> {
            match code {
                b'C' => Some(Self::Character),
                b'N' => Some(Self::Numeric),
                b'F' => Some(Self::Float),
                b'L' => Some(Self::Logical),
                b'D' => Some(Self::Date),
                _ => None,
            }
        }

        pub fn code(self) -> u8 {
            match self {
                Self::Character => b'C',
                Self::Numeric => b'N',
                Self::Float => b'F',
                Self::Logical => b'L',
                Self::Date => b'D',
            }
        }
    }

    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    pub struct FieldDescriptor {
        pub name: String,
        pub kind: FieldKind,
        pub length: u8,
        pub decimals: u8,
    }

    impl FieldDescriptor {
        pub fn character(name: impl Into<String>, length: u8) -> Self {
            Self {
                name: name.into(),
                kind: FieldKind::Character,
                length,
                decimals: 0,
            }
        }

        pub fn numeric(name: impl Into<String>, length: u8, decimals: u8) -> Self {
            Self {
                name: name.into(),
                kind: FieldKind::Numeric,
                length,
                decimals,
            }
        }
    }

    /// 属性值；空数值 / 未知逻辑值以 `None` 表示。
    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    pub enum AttributeValue {
        Character(String),
        Numeric(Option<f64>),
        Logical(Option<bool>),
        /// `YYYYMMDD`，空串表示缺失。
        Date(String),
    }

    impl AttributeValue {
        /// 该字段类型的空值。
        pub fn empty_for(kind: FieldKind) -> Self {
            match kind {
                FieldKind::Character => Self::Character(String::new()),
                FieldKind::Numeric | FieldKind::Float => Self::Numeric(None),
                FieldKind::Logical => Self::Logical(None),
                FieldKind::Date => Self::Date(String::new()),
            }
        }
    }

    /// 源 Shapefile 中的一个多边形要素：环列表 + 属性记录（不含隐式删除标记字段）。
    #[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
    pub struct BoundaryFeature {
        pub rings: Vec<Ring>,
        pub attributes: Vec<AttributeValue>,
    }
}
