// Copyright 2016 The Cartographer Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use num_traits::Float;
use serde_derive::{Deserialize, Serialize};
use std::iter::Sum;
use std::ops::{Add, Div};

// Entries follow GL semantics: they are in [0.; 1.] with 1. being fully saturated.
#[derive(Debug, Default, Copy, Clone, PartialEq, Serialize, Deserialize)]
pub struct Color<T> {
    pub red: T,
    pub green: T,
    pub blue: T,
    pub alpha: T,
}

impl Color<f32> {
    pub fn to_u8(&self) -> Color<u8> {
        Color {
            red: (self.red.max(0.).min(1.) * 255.).round() as u8,
            green: (self.green.max(0.).min(1.) * 255.).round() as u8,
            blue: (self.blue.max(0.).min(1.) * 255.).round() as u8,
            alpha: (self.alpha.max(0.).min(1.) * 255.).round() as u8,
        }
    }

    /// Componentwise linear interpolation, 't' = 0 yields 'self'.
    pub fn lerp(&self, other: &Color<f32>, t: f32) -> Color<f32> {
        Color {
            red: self.red + (other.red - self.red) * t,
            green: self.green + (other.green - self.green) * t,
            blue: self.blue + (other.blue - self.blue) * t,
            alpha: self.alpha + (other.alpha - self.alpha) * t,
        }
    }
}

impl Color<u8> {
    pub const fn rgb(red: u8, green: u8, blue: u8) -> Self {
        Color {
            red,
            green,
            blue,
            alpha: 255,
        }
    }

    pub fn to_f32(self) -> Color<f32> {
        Color {
            red: f32::from(self.red) / 255.,
            green: f32::from(self.green) / 255.,
            blue: f32::from(self.blue) / 255.,
            alpha: f32::from(self.alpha) / 255.,
        }
    }

    pub fn to_rgba(self) -> image::Rgba<u8> {
        image::Rgba([self.red, self.green, self.blue, self.alpha])
    }

    /// LAS stores colors as 16 bit channels. Some writers only fill the lower byte, so values that
    /// never exceed 255 are taken as is.
    pub fn from_u16_channels(red: u16, green: u16, blue: u16) -> Self {
        let wide = red > 255 || green > 255 || blue > 255;
        let scale = |v: u16| if wide { (v >> 8) as u8 } else { v as u8 };
        Color::rgb(scale(red), scale(green), scale(blue))
    }
}

impl<T: Float> Add for Color<T> {
    type Output = Self;

    fn add(self, other: Self) -> Self {
        Self {
            red: self.red + other.red,
            green: self.green + other.green,
            blue: self.blue + other.blue,
            alpha: self.alpha + other.alpha,
        }
    }
}

/// Channel sums, used to average the colours of a voxel.
impl<T: Float + Default> Sum for Color<T> {
    fn sum<I>(iter: I) -> Self
    where
        I: Iterator<Item = Self>,
    {
        iter.fold(Color::default(), |acc, x| acc + x)
    }
}

impl<T: Float> Div<T> for Color<T> {
    type Output = Self;

    fn div(self, rhs: T) -> Self::Output {
        Self {
            red: self.red / rhs,
            green: self.green / rhs,
            blue: self.blue / rhs,
            alpha: self.alpha / rhs,
        }
    }
}

pub const RED: Color<f32> = Color {
    red: 1.,
    green: 0.,
    blue: 0.,
    alpha: 1.,
};
pub const GREEN: Color<f32> = Color {
    red: 0.,
    green: 1.,
    blue: 0.,
    alpha: 1.,
};
pub const BLUE: Color<f32> = Color {
    red: 0.,
    green: 0.,
    blue: 1.,
    alpha: 1.,
};
pub const YELLOW: Color<f32> = Color {
    red: 1.,
    green: 1.,
    blue: 0.,
    alpha: 1.,
};
pub const CYAN: Color<f32> = Color {
    red: 0.,
    green: 1.,
    blue: 1.,
    alpha: 1.,
};
pub const BLACK: Color<f32> = Color {
    red: 0.,
    green: 0.,
    blue: 0.,
    alpha: 1.,
};
pub const WHITE: Color<f32> = Color {
    red: 1.,
    green: 1.,
    blue: 1.,
    alpha: 1.,
};
