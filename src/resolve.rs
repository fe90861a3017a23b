//! Resolution of a user-supplied image name or alias against the catalog.
//!
//! A concrete image id takes precedence; the region's alias list is only
//! consulted when no image matches. Finding nothing is a valid result.

use tracing::debug;

use crate::cloud::types::{Image, ImageId, Location};
use crate::cloud::{CloudApi, CloudError};

/// Kind of a resolved catalog resource.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ResourceKind {
    /// Catalog image.
    Image,
}

/// Catalog resource resolved before creation begins.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ResourceReference {
    /// Resource kind.
    pub kind: ResourceKind,
    /// Provider identifier.
    pub id: ImageId,
    /// Region the resource lives in.
    pub location: String,
}

/// Boot image selected for the server's volume.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ImageSource {
    /// Concrete catalog image.
    Image(ResourceReference),
    /// Image alias valid in the target region, such as `ubuntu:latest`.
    Alias(String),
    /// Neither lookup matched. The volume is requested without an image.
    Unresolved,
}

impl ImageSource {
    /// Returns the image id, when one was resolved.
    #[must_use]
    pub const fn image_id(&self) -> Option<&ImageId> {
        match self {
            Self::Image(reference) => Some(&reference.id),
            Self::Alias(_) | Self::Unresolved => None,
        }
    }

    /// Returns the alias, when one was resolved.
    #[must_use]
    pub fn alias(&self) -> Option<&str> {
        match self {
            Self::Alias(alias) => Some(alias.as_str()),
            Self::Image(_) | Self::Unresolved => None,
        }
    }
}

/// Image type searched in the catalog for a requested disk type.
///
/// Catalog images are typed `HDD` even when they back SSD volumes, so an
/// `SSD` request searches for `HDD`. Every other type is searched as given.
#[must_use]
pub fn catalog_image_type(disk_type: &str) -> &str {
    if disk_type.eq_ignore_ascii_case("SSD") {
        "HDD"
    } else {
        disk_type
    }
}

/// Selects the first public image in `region` whose name contains `name`
/// (case-insensitively) and whose type matches the catalog type for
/// `disk_type`.
#[must_use]
pub fn select_image<'a>(
    images: &'a [Image],
    name: &str,
    disk_type: &str,
    region: &str,
) -> Option<&'a Image> {
    let wanted = name.to_lowercase();
    let image_type = catalog_image_type(disk_type);
    images.iter().find(|image| {
        let properties = &image.properties;
        properties.name.to_lowercase().contains(&wanted)
            && properties.image_type == image_type
            && properties.location == region
            && properties.public
    })
}

/// Selects the first alias of `location` equal to `name`, ignoring case.
#[must_use]
pub fn select_alias<'a>(location: &'a Location, name: &str) -> Option<&'a str> {
    location
        .properties
        .image_aliases
        .iter()
        .find(|alias| alias.eq_ignore_ascii_case(name))
        .map(String::as_str)
}

/// Resolves image names through the catalog API.
#[derive(Clone, Copy)]
pub struct ImageResolver<'a> {
    api: &'a dyn CloudApi,
}

impl<'a> ImageResolver<'a> {
    /// Creates a resolver backed by `api`.
    #[must_use]
    pub const fn new(api: &'a dyn CloudApi) -> Self {
        Self { api }
    }

    /// Resolves `name` to an image id, falling back to a region alias.
    ///
    /// # Errors
    ///
    /// Returns [`CloudError`] when a catalog request fails. An empty name
    /// resolves to [`ImageSource::Unresolved`] without any request.
    pub async fn resolve(
        &self,
        name: &str,
        disk_type: &str,
        region: &str,
    ) -> Result<ImageSource, CloudError> {
        if name.trim().is_empty() {
            return Ok(ImageSource::Unresolved);
        }

        let images = self.api.list_images().await?.into_body()?;
        if let Some(image) = select_image(&images, name, disk_type, region) {
            debug!(image = %image.id, name, region, "resolved catalog image");
            return Ok(ImageSource::Image(ResourceReference {
                kind: ResourceKind::Image,
                id: image.id.clone(),
                location: image.properties.location.clone(),
            }));
        }

        let location = self.api.find_location(region).await?.into_body()?;
        Ok(select_alias(&location, name).map_or(ImageSource::Unresolved, |alias| {
            debug!(alias, region, "resolved image alias");
            ImageSource::Alias(alias.to_owned())
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cloud::ApiResponse;
    use crate::cloud::types::{ImageProperties, LocationProperties};
    use crate::test_support::{CloudCall, ScriptedCloud};
    use rstest::{fixture, rstest};

    fn image(id: &str, name: &str, image_type: &str, location: &str, public: bool) -> Image {
        Image {
            id: ImageId::from(id),
            properties: ImageProperties {
                name: name.to_owned(),
                image_type: image_type.to_owned(),
                location: location.to_owned(),
                public,
            },
        }
    }

    #[fixture]
    fn catalog() -> Vec<Image> {
        vec![
            image("img-cd", "Ubuntu-20.04-server.iso", "CDROM", "de/txl", true),
            image("img-private", "ubuntu-20.04-custom", "HDD", "de/txl", false),
            image("img-ubuntu", "Ubuntu-20.04", "HDD", "de/txl", true),
            image("img-debian", "debian-11-genericcloud", "HDD", "de/txl", true),
        ]
    }

    fn location(aliases: &[&str]) -> Location {
        Location {
            id: String::from("de/txl"),
            properties: LocationProperties {
                image_aliases: aliases.iter().map(|alias| (*alias).to_owned()).collect(),
            },
        }
    }

    #[rstest]
    #[case("SSD", "HDD")]
    #[case("ssd", "HDD")]
    #[case("HDD", "HDD")]
    #[case("CDROM", "CDROM")]
    fn catalog_type_maps_ssd_to_hdd(#[case] disk_type: &str, #[case] expected: &str) {
        assert_eq!(catalog_image_type(disk_type), expected);
    }

    #[rstest]
    fn ssd_request_finds_public_hdd_image(catalog: Vec<Image>) {
        let found = select_image(&catalog, "ubuntu", "SSD", "de/txl").map(|img| img.id.as_str());
        assert_eq!(found, Some("img-ubuntu"));
    }

    #[rstest]
    fn other_region_finds_nothing(catalog: Vec<Image>) {
        assert_eq!(select_image(&catalog, "ubuntu", "SSD", "de/fra"), None);
    }

    #[rstest]
    fn hdd_request_matches_hdd_catalog_entries(catalog: Vec<Image>) {
        let found = select_image(&catalog, "DEBIAN-11", "HDD", "de/txl").map(|img| img.id.as_str());
        assert_eq!(found, Some("img-debian"));
    }

    #[test]
    fn alias_match_ignores_case() {
        let record = location(&["debian:latest", "ubuntu:latest"]);
        assert_eq!(select_alias(&record, "UBUNTU:LATEST"), Some("ubuntu:latest"));
        assert_eq!(select_alias(&record, "ubuntu"), None);
    }

    #[rstest]
    #[tokio::test]
    async fn resolve_skips_alias_lookup_when_image_matches(catalog: Vec<Image>) {
        let cloud = ScriptedCloud::new();
        cloud.push_list_images(Ok(ApiResponse::ok(catalog)));

        let source = ImageResolver::new(&cloud)
            .resolve("ubuntu", "SSD", "de/txl")
            .await
            .expect("resolution");

        assert_eq!(source.image_id().map(ImageId::as_str), Some("img-ubuntu"));
        assert_eq!(cloud.calls(), vec![CloudCall::ListImages]);
    }

    #[rstest]
    #[tokio::test]
    async fn resolve_falls_back_to_region_alias(catalog: Vec<Image>) {
        let cloud = ScriptedCloud::new();
        cloud.push_list_images(Ok(ApiResponse::ok(catalog)));
        cloud.push_find_location(Ok(ApiResponse::ok(location(&["rocky:latest"]))));

        let source = ImageResolver::new(&cloud)
            .resolve("Rocky:Latest", "HDD", "de/txl")
            .await
            .expect("resolution");

        assert_eq!(source, ImageSource::Alias(String::from("rocky:latest")));
        assert_eq!(
            cloud.calls(),
            vec![CloudCall::ListImages, CloudCall::FindLocation(String::from("de/txl"))]
        );
    }

    #[rstest]
    #[tokio::test]
    async fn resolve_returns_unresolved_when_nothing_matches(catalog: Vec<Image>) {
        let cloud = ScriptedCloud::new();
        cloud.push_list_images(Ok(ApiResponse::ok(catalog)));
        cloud.push_find_location(Ok(ApiResponse::ok(location(&[]))));

        let source = ImageResolver::new(&cloud)
            .resolve("ubuntu", "SSD", "de/fra")
            .await
            .expect("not found is not an error");

        assert_eq!(source, ImageSource::Unresolved);
    }

    #[tokio::test]
    async fn resolve_propagates_catalog_failure() {
        let cloud = ScriptedCloud::new();
        cloud.push_list_images(Ok(ApiResponse::failure(401, "unauthorised")));

        let err = ImageResolver::new(&cloud)
            .resolve("ubuntu", "HDD", "de/txl")
            .await
            .expect_err("request error");

        assert_eq!(
            err,
            CloudError::Api {
                status: 401,
                message: String::from("unauthorised"),
            }
        );
    }
}
