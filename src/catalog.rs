use crate::api::{self, ImageInfo, NimClient, ID_COMPONENT_SEPARATOR};
use crate::error::NimError;
use crate::types::NimResult;
use log::{debug, info};
use serde::Serialize;
use std::cmp::Ordering;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

/// One node of the catalog tree. `depth` counts the id components consumed
/// by the path from the root down to and including this group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImageGroup {
    pub component_name: String,
    pub depth: usize,
    pub groups: Vec<ImageGroup>,
    pub items: Vec<ImageInfo>,
}

impl ImageGroup {
    /// The part of an item's id below this group, e.g. `2020-01-01` for
    /// `fw-2020-01-01` inside `fw`.
    pub fn display_name_for(&self, item: &ImageInfo) -> String {
        let components = item.components();
        if components.len() <= self.depth {
            return item.id.clone();
        }
        components[self.depth..].join(&ID_COMPONENT_SEPARATOR.to_string())
    }

    /// Every image below this group, depth first.
    pub fn all_items(&self) -> Vec<&ImageInfo> {
        let mut result = Vec::new();
        for group in &self.groups {
            result.extend(group.all_items());
        }
        result.extend(self.items.iter());
        result
    }
}

/// Total order over image ids: components left to right, case-insensitive
/// first with exact comparison breaking ties; a prefix sorts first.
pub fn compare_ids(a: &str, b: &str) -> Ordering {
    compare_components(a, b, |l, r| {
        l.chars()
            .flat_map(char::to_lowercase)
            .cmp(r.chars().flat_map(char::to_lowercase))
    })
    .then_with(|| compare_components(a, b, str::cmp))
}

fn compare_components(a: &str, b: &str, cmp: impl Fn(&str, &str) -> Ordering) -> Ordering {
    let mut left = a.split(ID_COMPONENT_SEPARATOR);
    let mut right = b.split(ID_COMPONENT_SEPARATOR);
    loop {
        match (left.next(), right.next()) {
            (None, None) => return Ordering::Equal,
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(l), Some(r)) => {
                let ordering = cmp(l, r);
                if ordering != Ordering::Equal {
                    return ordering;
                }
            }
        }
    }
}

/// Dates and version numbers: `20180926`, `2020`, `1.2.3`.
pub fn is_version_component(component: &str) -> bool {
    component.starts_with(|c: char| c.is_ascii_digit())
        && component.chars().all(|c| c.is_ascii_digit() || c == '.')
}

pub fn sort_images(images: &mut [ImageInfo]) {
    images.sort_by(|a, b| compare_ids(&a.id, &b.id));
}

/// Build the catalog tree over `images`, which must already be sorted with
/// [`sort_images`].
pub fn id_component_groups(images: &[ImageInfo]) -> Vec<ImageGroup> {
    let members: Vec<&ImageInfo> = images.iter().collect();
    partition(&members, 0)
        .into_iter()
        .map(|(name, members)| build_group(name, &members, 1))
        .collect()
}

fn component_at<'a>(image: &'a ImageInfo, depth: usize) -> Option<&'a str> {
    image.id.split(ID_COMPONENT_SEPARATOR).nth(depth)
}

/// Split `members` by their component at `depth`, keeping first-seen order.
/// Members without that component are left out.
fn partition<'a>(members: &[&'a ImageInfo], depth: usize) -> Vec<(String, Vec<&'a ImageInfo>)> {
    let mut parts: Vec<(String, Vec<&'a ImageInfo>)> = Vec::new();
    for image in members {
        let Some(component) = component_at(image, depth) else {
            continue;
        };
        match parts.iter_mut().find(|(name, _)| name == component) {
            Some((_, part)) => part.push(*image),
            None => parts.push((component.to_string(), vec![*image])),
        }
    }
    parts
}

fn build_group(component_name: String, members: &[&ImageInfo], depth: usize) -> ImageGroup {
    let branching: Vec<&ImageInfo> = members
        .iter()
        .copied()
        .filter(|image| matches!(component_at(image, depth), Some(c) if !is_version_component(c)))
        .collect();

    let mut groups = Vec::new();
    let mut nested: Vec<&str> = Vec::new();
    for (name, part) in partition(&branching, depth) {
        if part.len() > 1 {
            nested.extend(part.iter().map(|image| image.id.as_str()));
            groups.push(build_group(name, &part, depth + 1));
        }
    }

    let mut items: Vec<ImageInfo> = members
        .iter()
        .filter(|image| !nested.contains(&image.id.as_str()))
        .map(|image| (*image).clone())
        .collect();
    items.reverse();

    ImageGroup {
        component_name,
        depth,
        groups,
        items,
    }
}

#[derive(Default)]
struct CatalogState {
    images: Vec<ImageInfo>,
    groups: Vec<ImageGroup>,
    selected: Option<String>,
}

/// The most recently fetched base images, their tree, and the selection.
pub struct ImageCatalog {
    client: NimClient,
    state: RwLock<CatalogState>,
}

impl ImageCatalog {
    pub fn new(client: NimClient) -> Self {
        Self {
            client,
            state: RwLock::new(CatalogState::default()),
        }
    }

    /// Fetch the catalog and rebuild the tree from scratch. On failure the
    /// previous catalog stays in place.
    pub async fn list_base_images(&self) -> NimResult<Vec<ImageGroup>> {
        let url = self.client.authorized_url(&api::image_infos_endpoint()).await?;

        let mut images: Vec<ImageInfo> = self
            .client
            .get_data(&url)
            .await
            .map_err(|e| NimError::CatalogUnavailable(e.to_string()))?;

        sort_images(&mut images);
        let groups = id_component_groups(&images);
        info!(
            "Fetched {} base images in {} groups",
            images.len(),
            groups.len()
        );

        let mut state = self.write();
        let still_listed = match state.selected.as_deref() {
            Some(selected) => images.iter().any(|image| image.has_id(selected)),
            None => true,
        };
        if !still_listed {
            debug!("Selected image no longer in catalog, clearing selection");
            state.selected = None;
        }
        state.images = images;
        state.groups = groups.clone();

        Ok(groups)
    }

    pub fn find_by_id(&self, id: &str) -> Option<ImageInfo> {
        self.read()
            .images
            .iter()
            .find(|image| image.has_id(id))
            .cloned()
    }

    /// Make `id` the active base image. Fails with `NoImageSelected` when it
    /// is not in the fetched catalog.
    pub fn select(&self, id: &str) -> NimResult<ImageInfo> {
        let image = self.find_by_id(id).ok_or(NimError::NoImageSelected)?;
        self.write().selected = Some(image.id.clone());
        debug!("Selected base image {}", image.id);
        Ok(image)
    }

    pub fn clear_selection(&self) {
        self.write().selected = None;
    }

    pub fn selected(&self) -> Option<ImageInfo> {
        let state = self.read();
        let id = state.selected.as_deref()?;
        state.images.iter().find(|image| image.has_id(id)).cloned()
    }

    pub fn images(&self) -> Vec<ImageInfo> {
        self.read().images.clone()
    }

    pub fn groups(&self) -> Vec<ImageGroup> {
        self.read().groups.clone()
    }

    fn read(&self) -> RwLockReadGuard<'_, CatalogState> {
        self.state.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, CatalogState> {
        self.state.write().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::SessionKey;

    fn sorted(ids: &[&str]) -> Vec<ImageInfo> {
        let mut images: Vec<ImageInfo> = ids.iter().map(|id| ImageInfo::new(*id)).collect();
        sort_images(&mut images);
        images
    }

    fn item_ids(items: &[ImageInfo]) -> Vec<&str> {
        items.iter().map(|item| item.id.as_str()).collect()
    }

    #[test]
    fn test_compare_ids() {
        assert_eq!(compare_ids("fw", "fw-2020"), Ordering::Less);
        assert_eq!(compare_ids("fw-2020-02-01", "fw-2020-01-01"), Ordering::Greater);
        assert_eq!(compare_ids("fw-9", "FW-10"), Ordering::Greater);
        assert_eq!(compare_ids("FW-1", "fw-1"), Ordering::Less);
        assert_eq!(compare_ids("a-b", "a-b"), Ordering::Equal);
        // component-wise, not character-wise
        assert_eq!(compare_ids("a-b", "a.c"), Ordering::Less);
    }

    #[test]
    fn test_is_version_component() {
        assert!(is_version_component("20180926"));
        assert!(is_version_component("1.2.3"));
        assert!(!is_version_component("deb9"));
        assert!(!is_version_component(".1"));
        assert!(!is_version_component(""));
    }

    #[test]
    fn test_groups_dated_images_by_leading_component() {
        let images = sorted(&["fw-2020-01-01", "os-2019-12-01", "fw-2020-02-01"]);
        let groups = id_component_groups(&images);

        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].component_name, "fw");
        assert_eq!(groups[1].component_name, "os");
        assert_eq!(
            item_ids(&groups[0].items),
            vec!["fw-2020-02-01", "fw-2020-01-01"]
        );
        assert_eq!(item_ids(&groups[1].items), vec!["os-2019-12-01"]);
        assert_eq!(groups[0].display_name_for(&groups[0].items[0]), "2020-02-01");
    }

    #[test]
    fn test_nested_groups_follow_shared_prefixes() {
        let images = sorted(&[
            "solarnode-deb9-pi-20180926",
            "solarnode-deb9-pi-20181010",
            "solarnode-deb9-orangepi-20180926",
            "solarnode-deb10-pi-20200101",
        ]);
        let groups = id_component_groups(&images);
        assert_eq!(groups.len(), 1);

        let solarnode = &groups[0];
        assert_eq!(solarnode.depth, 1);
        assert_eq!(item_ids(&solarnode.items), vec!["solarnode-deb10-pi-20200101"]);
        assert_eq!(
            solarnode.display_name_for(&solarnode.items[0]),
            "deb10-pi-20200101"
        );

        assert_eq!(solarnode.groups.len(), 1);
        let deb9 = &solarnode.groups[0];
        assert_eq!(deb9.component_name, "deb9");
        assert_eq!(item_ids(&deb9.items), vec!["solarnode-deb9-orangepi-20180926"]);

        let pi = &deb9.groups[0];
        assert_eq!(pi.component_name, "pi");
        assert_eq!(pi.depth, 3);
        assert!(pi.groups.is_empty());
        assert_eq!(
            item_ids(&pi.items),
            vec!["solarnode-deb9-pi-20181010", "solarnode-deb9-pi-20180926"]
        );
    }

    #[test]
    fn test_every_image_appears_once() {
        let ids = [
            "a-x-1",
            "a-x-2",
            "a-y-1",
            "a",
            "b-1",
            "c-z-q-1",
            "c-z-q-2",
            "c-z-r-1",
        ];
        let images = sorted(&ids);
        let groups = id_component_groups(&images);

        let mut seen: Vec<&str> = groups
            .iter()
            .flat_map(|group| group.all_items())
            .map(|item| item.id.as_str())
            .collect();
        seen.sort_unstable();
        let mut expected = ids.to_vec();
        expected.sort_unstable();
        assert_eq!(seen, expected);

        let names: Vec<&str> = groups.iter().map(|g| g.component_name.as_str()).collect();
        assert_eq!(names, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_leaf_items_reverse_global_order() {
        let images = sorted(&["v-1.10", "v-1.2", "v-1.9", "v-2.0"]);
        let groups = id_component_groups(&images);

        let mut expected: Vec<&str> = item_ids(&images);
        expected.reverse();
        assert_eq!(item_ids(&groups[0].items), expected);
    }

    #[test]
    fn test_grouping_is_idempotent() {
        let images = sorted(&["fw-2020-01-01", "fw-2020-02-01", "os-2019-12-01", "os-a-1", "os-a-2"]);
        assert_eq!(id_component_groups(&images), id_component_groups(&images));
        assert!(id_component_groups(&[]).is_empty());
    }

    const INFOS_PATH: &str = "/api/v1/images/infos";

    async fn authorized_catalog(server: &mockito::Server) -> ImageCatalog {
        let client = NimClient::new(&server.url(), &server.url()).unwrap();
        client.set_session_key(SessionKey::new("abc")).await;
        ImageCatalog::new(client)
    }

    #[tokio::test]
    async fn test_list_requires_session() {
        let client = NimClient::new("http://127.0.0.1:9", "http://127.0.0.1:9").unwrap();
        let catalog = ImageCatalog::new(client);
        assert!(matches!(
            catalog.list_base_images().await,
            Err(NimError::NotAuthorized)
        ));
        assert!(catalog.find_by_id("fw-2020-01-01").is_none());
    }

    #[tokio::test]
    async fn test_list_and_select() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", INFOS_PATH)
            .match_header("accept", "application/json")
            .with_status(200)
            .with_body(
                r#"{"success":true,"data":[
                    {"id":"fw-2020-01-01","contentLength":10},
                    {"id":"os-2019-12-01"},
                    {"id":"fw-2020-02-01"}]}"#,
            )
            .create_async()
            .await;

        let catalog = authorized_catalog(&server).await;
        let groups = catalog.list_base_images().await.unwrap();

        assert_eq!(groups, catalog.groups());
        assert_eq!(catalog.images()[0].id, "fw-2020-01-01");
        assert_eq!(
            catalog.find_by_id("fw-2020-01-01").and_then(|i| i.content_length()),
            Some(10)
        );

        assert!(matches!(catalog.select("nope"), Err(NimError::NoImageSelected)));
        assert_eq!(catalog.selected(), None);
        catalog.select("os-2019-12-01").unwrap();
        assert_eq!(catalog.selected().map(|i| i.id), Some("os-2019-12-01".to_string()));

        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_failed_fetch_keeps_previous_catalog() {
        let mut server = mockito::Server::new_async().await;
        let ok = server
            .mock("GET", INFOS_PATH)
            .with_status(200)
            .with_body(r#"{"success":true,"data":[{"id":"fw-2020-01-01"}]}"#)
            .create_async()
            .await;

        let catalog = authorized_catalog(&server).await;
        let before = catalog.list_base_images().await.unwrap();
        ok.remove_async().await;

        let _rejected = server
            .mock("GET", INFOS_PATH)
            .with_status(200)
            .with_body(r#"{"success":true,"data":{"id":"not-a-list"}}"#)
            .create_async()
            .await;

        let err = catalog.list_base_images().await.unwrap_err();
        assert!(matches!(err, NimError::CatalogUnavailable(_)));
        assert_eq!(catalog.groups(), before);
        assert!(catalog.find_by_id("fw-2020-01-01").is_some());
    }
}
