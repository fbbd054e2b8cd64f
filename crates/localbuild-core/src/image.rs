//! Container image descriptors and the filtered image catalogue.

use serde::{Deserialize, Serialize};

use crate::filter::{AttributeValue, FilterPredicate, Filterable, Pattern};

fn default_tag() -> String {
    "latest".to_string()
}

/// Platform group of an image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Platform {
    pub arch: String,
    pub system: String,
    pub distro: String,
}

impl Filterable for Platform {
    fn attribute(&self, name: &str) -> Option<AttributeValue<'_>> {
        match name {
            "arch" => Some(AttributeValue::Scalar(Some(&self.arch))),
            "system" => Some(AttributeValue::Scalar(Some(&self.system))),
            "distro" => Some(AttributeValue::Scalar(Some(&self.distro))),
            _ => None,
        }
    }
}

/// A container image declared by a project. Immutable once loaded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageDescriptor {
    /// Registry organisation, if the image is pushed somewhere.
    #[serde(default)]
    pub org: Option<String>,
    pub name: String,
    #[serde(default = "default_tag")]
    pub tag: String,
    #[serde(default)]
    pub variant: Option<String>,
    pub platform: Platform,
}

impl ImageDescriptor {
    /// Fully qualified name: `[org/]name:tag`.
    pub fn fqn(&self) -> String {
        match &self.org {
            Some(org) => format!("{}/{}:{}", org, self.name, self.tag),
            None => format!("{}:{}", self.name, self.tag),
        }
    }
}

impl std::fmt::Display for ImageDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.fqn())
    }
}

impl Filterable for ImageDescriptor {
    fn attribute(&self, name: &str) -> Option<AttributeValue<'_>> {
        match name {
            "org" => Some(AttributeValue::Scalar(self.org.as_deref())),
            "name" => Some(AttributeValue::Scalar(Some(&self.name))),
            "tag" => Some(AttributeValue::Scalar(Some(&self.tag))),
            "variant" => Some(AttributeValue::Scalar(self.variant.as_deref())),
            "platform" => Some(AttributeValue::Group(&self.platform)),
            _ => None,
        }
    }
}

/// The standard image selection, one pattern per attribute.
///
/// Every field defaults to `*`; `no_variant` replaces the variant pattern
/// with the unset marker.
#[derive(Debug, Clone)]
pub struct ImageFilter {
    pub name: String,
    pub tag: String,
    pub variant: String,
    pub no_variant: bool,
    pub arch: String,
    pub system: String,
    pub distro: String,
}

impl Default for ImageFilter {
    fn default() -> Self {
        Self {
            name: "*".to_string(),
            tag: "*".to_string(),
            variant: "*".to_string(),
            no_variant: false,
            arch: "*".to_string(),
            system: "*".to_string(),
            distro: "*".to_string(),
        }
    }
}

impl ImageFilter {
    /// Build the nested predicate for this selection.
    pub fn predicate(&self) -> FilterPredicate {
        let variant = if self.no_variant {
            Pattern::Unset
        } else {
            Pattern::parse(&self.variant)
        };

        FilterPredicate::new()
            .with("name", self.name.as_str())
            .with("tag", self.tag.as_str())
            .with("variant", variant)
            .with_group(
                "platform",
                FilterPredicate::new()
                    .with("arch", self.arch.as_str())
                    .with("system", self.system.as_str())
                    .with("distro", self.distro.as_str()),
            )
    }
}

/// Ordered collection of image descriptors.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImageCollection {
    images: Vec<ImageDescriptor>,
}

impl ImageCollection {
    pub fn new(images: Vec<ImageDescriptor>) -> Self {
        Self { images }
    }

    /// Images matching `predicate`, in their original order.
    pub fn filter(&self, predicate: &FilterPredicate) -> ImageCollection {
        self.images
            .iter()
            .filter(|image| predicate.matches(*image))
            .cloned()
            .collect()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ImageDescriptor> {
        self.images.iter()
    }

    pub fn len(&self) -> usize {
        self.images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }

    pub fn get(&self, fqn_or_name: &str) -> Option<&ImageDescriptor> {
        self.images
            .iter()
            .find(|i| i.fqn() == fqn_or_name || i.name == fqn_or_name)
    }
}

impl FromIterator<ImageDescriptor> for ImageCollection {
    fn from_iter<I: IntoIterator<Item = ImageDescriptor>>(iter: I) -> Self {
        Self {
            images: iter.into_iter().collect(),
        }
    }
}

impl<'a> IntoIterator for &'a ImageCollection {
    type Item = &'a ImageDescriptor;
    type IntoIter = std::slice::Iter<'a, ImageDescriptor>;

    fn into_iter(self) -> Self::IntoIter {
        self.images.iter()
    }
}
