//! Neo4j-backed graph store: one hash-skip probe plus one `MERGE`-based write transaction per
//! batch, per data type (§4.5). All writes are idempotent and commutative, so batch ordering
//! within a type never matters for correctness.

use crate::bolt::{bolt_list, bolt_map, bolt_opt_int, bolt_string, edge_tuples};
use crate::record::{ArtistRecord, LabelRecord, MasterRecord, ReleaseRecord};
use futures::TryStreamExt;
use neo4rs::{Graph, Query, query};
use std::collections::HashMap;
use thiserror::Error;
use tracing::debug;

/// Errors a batch write can fail with, collapsed to the two kinds the batch processor cares
/// about: connection-shaped failures that warrant re-queuing the whole batch at the front
/// (mirroring the reference's `ServiceUnavailable`/`SessionExpired` handling), and everything
/// else, which only warrants a nack.
#[derive(Debug, Error)]
pub enum GraphError {
    #[error("neo4j connection unavailable: {0}")]
    Transient(String),
    #[error("neo4j write failed: {0}")]
    Other(String),
}

impl GraphError {
    fn classify(err: neo4rs::Error) -> Self {
        let message = err.to_string();
        let lowered = message.to_lowercase();
        if lowered.contains("unavailable") || lowered.contains("session expired") || lowered.contains("connection") || lowered.contains("broken pipe")
        {
            GraphError::Transient(message)
        } else {
            GraphError::Other(message)
        }
    }
}

pub struct Neo4jStore {
    graph: Graph,
}

impl Neo4jStore {
    pub async fn connect(uri: &str, user: &str, password: &str) -> Result<Self, GraphError> {
        let graph = Graph::new(uri, user, password).await.map_err(GraphError::classify)?;
        Ok(Self { graph })
    }

    /// `UNWIND $ids AS id OPTIONAL MATCH (n:<label> {id:id}) RETURN id, n.sha256` (§4.5 step 2).
    async fn fetch_hashes(&self, label: &str, ids: &[String]) -> Result<HashMap<String, String>, GraphError> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }
        let cypher = format!("UNWIND $ids AS id OPTIONAL MATCH (n:{label} {{id: id}}) RETURN id, n.sha256 AS hash", label = label);
        let mut stream = self.graph.execute(query(&cypher).param("ids", ids.to_vec())).await.map_err(GraphError::classify)?;

        let mut hashes = HashMap::new();
        while let Some(row) = stream.try_next().await.map_err(GraphError::classify)? {
            let id: String = row.get("id").unwrap_or_default();
            if let Ok(hash) = row.get::<String>("hash") {
                hashes.insert(id, hash);
            }
        }
        Ok(hashes)
    }

    /// Runs every query in one write transaction, committing only if all succeed.
    async fn run_write(&self, queries: Vec<Query>) -> Result<(), GraphError> {
        let txn = self.graph.start_txn().await.map_err(GraphError::classify)?;
        for q in queries {
            txn.run(q).await.map_err(GraphError::classify)?;
        }
        txn.commit().await.map_err(GraphError::classify)?;
        Ok(())
    }

    pub async fn upsert_artists(&self, records: &[ArtistRecord]) -> Result<usize, GraphError> {
        let ids: Vec<String> = records.iter().map(|r| r.id.clone()).collect();
        let existing = self.fetch_hashes("Artist", &ids).await?;
        let to_write: Vec<&ArtistRecord> = records.iter().filter(|r| existing.get(&r.id) != Some(&r.sha256)).collect();
        if to_write.is_empty() {
            debug!("⏩ All artists in batch already up to date");
            return Ok(0);
        }

        let artist_maps = bolt_list(
            to_write
                .iter()
                .map(|r| {
                    bolt_map(vec![
                        ("id", bolt_string(&r.id)),
                        ("name", bolt_string(&r.name)),
                        ("sha256", bolt_string(&r.sha256)),
                        ("resource_url", bolt_string(&format!("https://api.discogs.com/artists/{}", r.id))),
                        ("releases_url", bolt_string(&format!("https://api.discogs.com/artists/{}/releases", r.id))),
                    ])
                })
                .collect(),
        );

        let mut queries = vec![
            query(
                "UNWIND $artists AS artist MERGE (a:Artist {id: artist.id}) \
                 SET a.name = artist.name, a.sha256 = artist.sha256, \
                     a.resource_url = artist.resource_url, a.releases_url = artist.releases_url",
            )
            .param("artists", artist_maps),
        ];

        let members = edge_tuples(&to_write, "artist_id", "member_id", |r| r.id.as_str(), |r| r.members.iter());
        if !is_empty_list(&members) {
            queries.push(
                query(
                    "UNWIND $members AS rel MATCH (a:Artist {id: rel.artist_id}) MERGE (m:Artist {id: rel.member_id}) MERGE (m)-[:MEMBER_OF]->(a)",
                )
                .param("members", members),
            );
        }

        let groups = edge_tuples(&to_write, "artist_id", "group_id", |r| r.id.as_str(), |r| r.groups.iter());
        if !is_empty_list(&groups) {
            queries.push(
                query("UNWIND $groups AS rel MATCH (a:Artist {id: rel.artist_id}) MERGE (g:Artist {id: rel.group_id}) MERGE (a)-[:MEMBER_OF]->(g)")
                    .param("groups", groups),
            );
        }

        let aliases = edge_tuples(&to_write, "artist_id", "alias_id", |r| r.id.as_str(), |r| r.aliases.iter());
        if !is_empty_list(&aliases) {
            queries.push(
                query("UNWIND $aliases AS rel MATCH (a:Artist {id: rel.artist_id}) MERGE (al:Artist {id: rel.alias_id}) MERGE (al)-[:ALIAS_OF]->(a)")
                    .param("aliases", aliases),
            );
        }

        self.run_write(queries).await?;
        Ok(to_write.len())
    }

    pub async fn upsert_labels(&self, records: &[LabelRecord]) -> Result<usize, GraphError> {
        let ids: Vec<String> = records.iter().map(|r| r.id.clone()).collect();
        let existing = self.fetch_hashes("Label", &ids).await?;
        let to_write: Vec<&LabelRecord> = records.iter().filter(|r| existing.get(&r.id) != Some(&r.sha256)).collect();
        if to_write.is_empty() {
            debug!("⏩ All labels in batch already up to date");
            return Ok(0);
        }

        let label_maps = bolt_list(
            to_write
                .iter()
                .map(|r| bolt_map(vec![("id", bolt_string(&r.id)), ("name", bolt_string(&r.name)), ("sha256", bolt_string(&r.sha256))]))
                .collect(),
        );

        let mut queries =
            vec![query("UNWIND $labels AS label MERGE (l:Label {id: label.id}) SET l.name = label.name, l.sha256 = label.sha256").param("labels", label_maps)];

        let parents = bolt_list(
            to_write
                .iter()
                .filter_map(|r| r.parent_label.as_ref().map(|p| bolt_map(vec![("label_id", bolt_string(&r.id)), ("parent_id", bolt_string(&p.id))])))
                .collect(),
        );
        if !is_empty_list(&parents) {
            queries.push(
                query("UNWIND $parents AS rel MATCH (l:Label {id: rel.label_id}) MERGE (p:Label {id: rel.parent_id}) MERGE (l)-[:SUBLABEL_OF]->(p)")
                    .param("parents", parents),
            );
        }

        let sublabels = edge_tuples(&to_write, "label_id", "sublabel_id", |r| r.id.as_str(), |r| r.sublabels.iter());
        if !is_empty_list(&sublabels) {
            queries.push(
                query(
                    "UNWIND $sublabels AS rel MATCH (l:Label {id: rel.label_id}) MERGE (s:Label {id: rel.sublabel_id}) MERGE (s)-[:SUBLABEL_OF]->(l)",
                )
                .param("sublabels", sublabels),
            );
        }

        self.run_write(queries).await?;
        Ok(to_write.len())
    }

    pub async fn upsert_masters(&self, records: &[MasterRecord]) -> Result<usize, GraphError> {
        let ids: Vec<String> = records.iter().map(|r| r.id.clone()).collect();
        let existing = self.fetch_hashes("Master", &ids).await?;
        let to_write: Vec<&MasterRecord> = records.iter().filter(|r| existing.get(&r.id) != Some(&r.sha256)).collect();
        if to_write.is_empty() {
            debug!("⏩ All masters in batch already up to date");
            return Ok(0);
        }

        let master_maps = bolt_list(
            to_write
                .iter()
                .map(|r| {
                    bolt_map(vec![
                        ("id", bolt_string(&r.id)),
                        ("title", bolt_string(&r.title)),
                        ("year", bolt_opt_int(r.year)),
                        ("sha256", bolt_string(&r.sha256)),
                    ])
                })
                .collect(),
        );

        let mut queries = vec![
            query("UNWIND $masters AS master MERGE (m:Master {id: master.id}) SET m.title = master.title, m.year = master.year, m.sha256 = master.sha256")
                .param("masters", master_maps),
        ];

        let artists = edge_tuples(&to_write, "master_id", "artist_id", |r| r.id.as_str(), |r| r.artists.iter());
        if !is_empty_list(&artists) {
            queries.push(
                query("UNWIND $artists AS rel MATCH (m:Master {id: rel.master_id}) MERGE (a:Artist {id: rel.artist_id}) MERGE (m)-[:BY]->(a)")
                    .param("artists", artists),
            );
        }

        push_genre_style_queries(&mut queries, &to_write, "master_id", "Master");

        self.run_write(queries).await?;
        Ok(to_write.len())
    }

    pub async fn upsert_releases(&self, records: &[ReleaseRecord]) -> Result<usize, GraphError> {
        let ids: Vec<String> = records.iter().map(|r| r.id.clone()).collect();
        let existing = self.fetch_hashes("Release", &ids).await?;
        let to_write: Vec<&ReleaseRecord> = records.iter().filter(|r| existing.get(&r.id) != Some(&r.sha256)).collect();
        if to_write.is_empty() {
            debug!("⏩ All releases in batch already up to date");
            return Ok(0);
        }

        let release_maps = bolt_list(
            to_write
                .iter()
                .map(|r| bolt_map(vec![("id", bolt_string(&r.id)), ("title", bolt_string(&r.title)), ("sha256", bolt_string(&r.sha256))]))
                .collect(),
        );

        let mut queries = vec![
            query("UNWIND $releases AS release MERGE (r:Release {id: release.id}) SET r.title = release.title, r.sha256 = release.sha256")
                .param("releases", release_maps),
        ];

        let artists = edge_tuples(&to_write, "release_id", "artist_id", |r| r.id.as_str(), |r| r.artists.iter());
        if !is_empty_list(&artists) {
            queries.push(
                query("UNWIND $artists AS rel MATCH (r:Release {id: rel.release_id}) MERGE (a:Artist {id: rel.artist_id}) MERGE (r)-[:BY]->(a)")
                    .param("artists", artists),
            );
        }

        let labels = edge_tuples(&to_write, "release_id", "label_id", |r| r.id.as_str(), |r| r.labels.iter());
        if !is_empty_list(&labels) {
            queries.push(
                query("UNWIND $labels AS rel MATCH (r:Release {id: rel.release_id}) MERGE (l:Label {id: rel.label_id}) MERGE (r)-[:ON]->(l)")
                    .param("labels", labels),
            );
        }

        let masters = bolt_list(
            to_write
                .iter()
                .filter_map(|r| r.master_id.as_ref().map(|mid| bolt_map(vec![("release_id", bolt_string(&r.id)), ("master_id", bolt_string(mid))])))
                .collect(),
        );
        if !is_empty_list(&masters) {
            queries.push(
                query(
                    "UNWIND $masters AS rel MATCH (r:Release {id: rel.release_id}) MERGE (m:Master {id: rel.master_id}) MERGE (r)-[:DERIVED_FROM]->(m)",
                )
                .param("masters", masters),
            );
        }

        push_genre_style_queries(&mut queries, &to_write, "release_id", "Release");

        self.run_write(queries).await?;
        Ok(to_write.len())
    }
}

/// Shared by masters and releases: `(node)-[:IS]->(Genre|Style)` plus `(Style)-[:PART_OF]->(Genre)`.
fn push_genre_style_queries<T>(queries: &mut Vec<Query>, records: &[&T], id_field: &str, label: &str)
where
    T: HasGenresAndStyles,
{
    let genres = bolt_list(
        records
            .iter()
            .flat_map(|r| r.genres().iter().map(move |g| bolt_map(vec![(id_field, bolt_string(r.id())), ("genre", bolt_string(g))])))
            .collect(),
    );
    if !is_empty_list(&genres) {
        queries.push(
            query(&format!(
                "UNWIND $genres AS rel MATCH (n:{label} {{id: rel.{id_field}}}) MERGE (g:Genre {{name: rel.genre}}) MERGE (n)-[:IS]->(g)",
                label = label,
                id_field = id_field
            ))
            .param("genres", genres),
        );
    }

    let styles = bolt_list(
        records
            .iter()
            .flat_map(|r| r.styles().iter().map(move |s| bolt_map(vec![(id_field, bolt_string(r.id())), ("style", bolt_string(s))])))
            .collect(),
    );
    if !is_empty_list(&styles) {
        queries.push(
            query(&format!(
                "UNWIND $styles AS rel MATCH (n:{label} {{id: rel.{id_field}}}) MERGE (s:Style {{name: rel.style}}) MERGE (n)-[:IS]->(s)",
                label = label,
                id_field = id_field
            ))
            .param("styles", styles),
        );
    }

    let genre_style_pairs = bolt_list(
        records
            .iter()
            .flat_map(|r| {
                r.genres().iter().flat_map(move |g| r.styles().iter().map(move |s| bolt_map(vec![("genre", bolt_string(g)), ("style", bolt_string(s))])))
            })
            .collect(),
    );
    if !is_empty_list(&genre_style_pairs) {
        queries.push(
            query("UNWIND $pairs AS pair MERGE (g:Genre {name: pair.genre}) MERGE (s:Style {name: pair.style}) MERGE (s)-[:PART_OF]->(g)")
                .param("pairs", genre_style_pairs),
        );
    }
}

trait HasGenresAndStyles {
    fn id(&self) -> &str;
    fn genres(&self) -> &[String];
    fn styles(&self) -> &[String];
}

impl HasGenresAndStyles for MasterRecord {
    fn id(&self) -> &str {
        &self.id
    }
    fn genres(&self) -> &[String] {
        &self.genres
    }
    fn styles(&self) -> &[String] {
        &self.styles
    }
}

impl HasGenresAndStyles for ReleaseRecord {
    fn id(&self) -> &str {
        &self.id
    }
    fn genres(&self) -> &[String] {
        &self.genres
    }
    fn styles(&self) -> &[String] {
        &self.styles
    }
}

fn is_empty_list(value: &neo4rs::BoltType) -> bool {
    matches!(value, neo4rs::BoltType::List(list) if list.value.is_empty())
}
