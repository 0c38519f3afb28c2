use serde::{Deserialize, Serialize};
use std::ops::{Add, AddAssign, Mul, Neg, Sub, SubAssign};

/// Point or offset in arena coordinates. The origin is the top-left corner
/// and y grows downward, so heading 0 faces +x and PI/2 faces +y.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct Vec2 {
    pub x: f32,
    pub y: f32,
}

impl Vec2 {
    pub const ZERO: Vec2 = Vec2 { x: 0.0, y: 0.0 };

    #[inline]
    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    /// Unit vector for a heading in radians
    #[inline]
    pub fn from_angle(heading: f32) -> Self {
        let (sin, cos) = heading.sin_cos();
        Self { x: cos, y: sin }
    }

    /// The point `distance` units ahead along `heading`
    #[inline]
    pub fn ahead(self, heading: f32, distance: f32) -> Self {
        self + Self::from_angle(heading) * distance
    }

    #[inline]
    pub fn length_sq(self) -> f32 {
        self.x * self.x + self.y * self.y
    }

    #[inline]
    pub fn length(self) -> f32 {
        self.length_sq().sqrt()
    }

    /// Unit vector in the same direction; zero stays zero
    pub fn normalize(self) -> Self {
        match self.length() {
            len if len > 0.0 => self * (1.0 / len),
            _ => Self::ZERO,
        }
    }

    #[inline]
    pub fn distance_to(self, other: Vec2) -> f32 {
        (self - other).length()
    }

    #[inline]
    pub fn distance_sq_to(self, other: Vec2) -> f32 {
        (self - other).length_sq()
    }

    /// Clamp each component into `[min, max]`
    pub fn clamp(self, min: Vec2, max: Vec2) -> Self {
        Self::new(self.x.clamp(min.x, max.x), self.y.clamp(min.y, max.y))
    }

    /// Keep a circle of `radius` inside a `width` x `height` rectangle at the origin
    pub fn clamp_inside(self, width: f32, height: f32, radius: f32) -> Self {
        self.clamp(Vec2::new(radius, radius), Vec2::new(width - radius, height - radius))
    }

    #[inline]
    pub fn is_finite(self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }
}

macro_rules! componentwise {
    ($op:ident, $method:ident, $assign:ident, $assign_method:ident, $sym:tt) => {
        impl $op for Vec2 {
            type Output = Self;

            #[inline]
            fn $method(self, rhs: Self) -> Self {
                Self::new(self.x $sym rhs.x, self.y $sym rhs.y)
            }
        }

        impl $assign for Vec2 {
            #[inline]
            fn $assign_method(&mut self, rhs: Self) {
                *self = *self $sym rhs;
            }
        }
    };
}

componentwise!(Add, add, AddAssign, add_assign, +);
componentwise!(Sub, sub, SubAssign, sub_assign, -);

impl Mul<f32> for Vec2 {
    type Output = Self;

    #[inline]
    fn mul(self, scale: f32) -> Self {
        Self::new(self.x * scale, self.y * scale)
    }
}

impl Neg for Vec2 {
    type Output = Self;

    #[inline]
    fn neg(self) -> Self {
        Self::new(-self.x, -self.y)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::{FRAC_PI_2, PI};

    fn close(a: Vec2, b: Vec2) -> bool {
        a.distance_to(b) < 1e-4
    }

    #[test]
    fn test_headings_follow_screen_axes() {
        assert!(close(Vec2::from_angle(0.0), Vec2::new(1.0, 0.0)));
        assert!(close(Vec2::from_angle(FRAC_PI_2), Vec2::new(0.0, 1.0)));
        assert!(close(Vec2::from_angle(PI), Vec2::new(-1.0, 0.0)));
    }

    #[test]
    fn test_ahead() {
        let muzzle = Vec2::new(100.0, 100.0).ahead(FRAC_PI_2, 30.0);
        assert!(close(muzzle, Vec2::new(100.0, 130.0)));
    }

    #[test]
    fn test_normalize() {
        let n = Vec2::new(3.0, 4.0).normalize();
        assert!(close(n, Vec2::new(0.6, 0.8)));
        assert_eq!(Vec2::ZERO.normalize(), Vec2::ZERO);
    }

    #[test]
    fn test_clamp_inside_arena() {
        let v = Vec2::new(-5.0, 5000.0).clamp_inside(4000.0, 3000.0, 20.0);
        assert_eq!(v, Vec2::new(20.0, 2980.0));

        let inside = Vec2::new(500.0, 500.0);
        assert_eq!(inside.clamp_inside(4000.0, 3000.0, 20.0), inside);
    }

    #[test]
    fn test_ops() {
        let mut v = Vec2::new(1.0, 2.0) + Vec2::new(3.0, 4.0);
        assert_eq!(v, Vec2::new(4.0, 6.0));
        v -= Vec2::new(1.0, 1.0);
        assert_eq!(v * 2.0, Vec2::new(6.0, 10.0));
        assert_eq!(-v, Vec2::new(-3.0, -5.0));
        assert_eq!(Vec2::new(3.0, 4.0).length(), 5.0);
    }

    #[test]
    fn test_is_finite() {
        assert!(Vec2::new(1.0, 2.0).is_finite());
        assert!(!Vec2::new(f32::NAN, 0.0).is_finite());
    }
}
