//! Vertex layouts of submeshes and their reconciliation with program inputs.
//!
//! A submesh stores interleaved float attributes, each identified by its
//! shader location. A program declares which locations it reads. Matching is
//! by location alone: declaration order and unused submesh attributes don't
//! matter, but every location the program reads must exist in the submesh.

use crate::error::{RenderError, RenderResult};

/// Size of one attribute component in bytes (all attributes are float32).
pub const COMPONENT_SIZE: u32 = 4;

/// One attribute stored in a submesh's vertex data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VertexAttribute {
    pub location: u8,
    pub component_count: u8,
    /// Offset from the start of a vertex
    pub byte_offset: u8,
}

/// One vertex input declared by a program. Programs don't know offsets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ShaderAttribute {
    pub location: u8,
    pub component_count: u8,
}

impl ShaderAttribute {
    pub fn new(location: u8, component_count: u8) -> Self {
        Self {
            location,
            component_count,
        }
    }
}

/// Ordered attribute list plus stride of an interleaved submesh.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct SubmeshLayout {
    attributes: Vec<VertexAttribute>,
    stride: u32,
}

impl SubmeshLayout {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a float attribute right after the previous one.
    ///
    /// An attribute starting past byte 255 can't be addressed; it still takes
    /// up its space in the stride but is left out, so programs reading its
    /// location fail to match.
    pub fn with_attribute(mut self, location: u8, component_count: u8) -> Self {
        match u8::try_from(self.stride) {
            Ok(byte_offset) => self.attributes.push(VertexAttribute {
                location,
                component_count,
                byte_offset,
            }),
            Err(_) => log::warn!(
                "Attribute at location {} starts at byte {}, past the addressable offset range",
                location,
                self.stride
            ),
        }
        self.stride += component_count as u32 * COMPONENT_SIZE;
        self
    }

    /// Build from explicit attributes, e.g. a layout with padding.
    pub fn from_parts(attributes: Vec<VertexAttribute>, stride: u32) -> Self {
        Self { attributes, stride }
    }

    pub fn attributes(&self) -> &[VertexAttribute] {
        &self.attributes
    }

    pub fn stride(&self) -> u32 {
        self.stride
    }

    pub fn find(&self, location: u8) -> Option<&VertexAttribute> {
        self.attributes.iter().find(|a| a.location == location)
    }

    /// Number of floats per vertex.
    pub fn floats_per_vertex(&self) -> usize {
        (self.stride / COMPONENT_SIZE) as usize
    }
}

/// Pair every program input with the submesh attribute at the same location.
///
/// The result follows the program's declaration order.
pub fn match_layout(
    shader: &[ShaderAttribute],
    layout: &SubmeshLayout,
) -> RenderResult<Vec<VertexAttribute>> {
    shader
        .iter()
        .map(|input| {
            let mut candidates = layout
                .attributes()
                .iter()
                .filter(|a| a.location == input.location);
            match (candidates.next(), candidates.next()) {
                (Some(attribute), None) => Ok(*attribute),
                _ => Err(RenderError::LayoutMismatch {
                    location: input.location,
                }),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn standard_layout() -> SubmeshLayout {
        SubmeshLayout::new()
            .with_attribute(0, 3)
            .with_attribute(1, 3)
            .with_attribute(2, 2)
    }

    #[test]
    fn test_builder_offsets_and_stride() {
        let layout = standard_layout();
        let offsets: Vec<u8> = layout.attributes().iter().map(|a| a.byte_offset).collect();
        assert_eq!(offsets, vec![0, 12, 24]);
        assert_eq!(layout.stride(), 32);
        assert_eq!(layout.floats_per_vertex(), 8);
    }

    #[test]
    fn test_match_ignores_declaration_order() {
        let shader = [ShaderAttribute::new(2, 2), ShaderAttribute::new(0, 3)];
        let matched = match_layout(&shader, &standard_layout()).unwrap();
        assert_eq!(matched.len(), 2);
        assert_eq!(matched[0].location, 2);
        assert_eq!(matched[0].byte_offset, 24);
        assert_eq!(matched[1].location, 0);
        assert_eq!(matched[1].byte_offset, 0);
    }

    #[test]
    fn test_missing_location_is_reported() {
        let layout = SubmeshLayout::new().with_attribute(0, 3).with_attribute(1, 3);
        let shader = [
            ShaderAttribute::new(0, 3),
            ShaderAttribute::new(1, 3),
            ShaderAttribute::new(2, 2),
        ];
        let err = match_layout(&shader, &layout).unwrap_err();
        assert!(matches!(err, RenderError::LayoutMismatch { location: 2 }));
    }

    #[test]
    fn test_duplicate_location_is_a_mismatch() {
        let layout = SubmeshLayout::from_parts(
            vec![
                VertexAttribute {
                    location: 0,
                    component_count: 3,
                    byte_offset: 0,
                },
                VertexAttribute {
                    location: 0,
                    component_count: 3,
                    byte_offset: 12,
                },
            ],
            24,
        );
        let err = match_layout(&[ShaderAttribute::new(0, 3)], &layout).unwrap_err();
        assert!(matches!(err, RenderError::LayoutMismatch { location: 0 }));
    }

    #[test]
    fn test_attribute_past_offset_range_is_left_out() {
        let layout = (0..17u8).fold(SubmeshLayout::new(), |layout, location| {
            layout.with_attribute(location, 4)
        });

        assert_eq!(layout.attributes().len(), 16);
        assert_eq!(layout.find(15).map(|a| a.byte_offset), Some(240));
        assert!(layout.find(16).is_none());
        assert_eq!(layout.stride(), 17 * 16);

        let err = match_layout(&[ShaderAttribute::new(16, 4)], &layout).unwrap_err();
        assert!(matches!(err, RenderError::LayoutMismatch { location: 16 }));
    }

    #[rstest]
    #[case(&[0], true)]
    #[case(&[0, 1], true)]
    #[case(&[0, 1, 2], true)]
    #[case(&[3], false)]
    #[case(&[1, 4], false)]
    fn test_match_is_total_or_fails(#[case] locations: &[u8], #[case] ok: bool) {
        let shader: Vec<ShaderAttribute> = locations
            .iter()
            .map(|&l| ShaderAttribute::new(l, 3))
            .collect();
        let result = match_layout(&shader, &standard_layout());
        assert_eq!(result.is_ok(), ok);
        if let Ok(matched) = result {
            assert_eq!(matched.len(), shader.len());
        }
    }
}
