//! Request validation and dispatch.
//!
//! The connection drives two stages: [`RequestHandler::handle_header`]
//! runs as soon as the header frame arrives and decides whether the
//! offsets payload is worth reading; [`RequestHandler::handle_get_counts`]
//! runs once the offsets are in and produces the response.

use std::path::PathBuf;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::error::StatusCode;
use crate::index::IndexSet;
use crate::methylome::{
    metadata_path, methylome_path, CountsRecord, MethylomeMetadata, MethylomeSet,
};

use super::request::{validate_accession, RequestHeader};
use super::response::ResponseHeader;
use super::MAX_INTERVALS;

/// Shared server state consulted by every connection.
pub struct RequestHandler {
    indexes: IndexSet,
    methylomes: MethylomeSet,
    methylome_dir: PathBuf,
}

impl RequestHandler {
    #[must_use]
    pub fn new(indexes: IndexSet, methylomes: MethylomeSet, methylome_dir: PathBuf) -> Self {
        Self {
            indexes,
            methylomes,
            methylome_dir,
        }
    }

    #[must_use]
    pub fn methylomes(&self) -> &MethylomeSet {
        &self.methylomes
    }

    /// Validates a request header. On success the returned metadata feeds
    /// the counts stage; on failure the response header carries the error
    /// and the connection writes it without reading the offsets.
    pub fn handle_header(
        &self,
        req: &RequestHeader,
    ) -> (ResponseHeader, Option<MethylomeMetadata>) {
        if let Err(err) = validate_accession(&req.accession) {
            warn!(%err, "rejecting request header");
            return (ResponseHeader::error(StatusCode::BadRequest), None);
        }
        if req.n_intervals > MAX_INTERVALS {
            warn!(
                n_intervals = req.n_intervals,
                max = MAX_INTERVALS,
                "rejecting oversized request"
            );
            return (ResponseHeader::error(StatusCode::BadRequest), None);
        }

        let metadata_file = metadata_path(&methylome_path(&self.methylome_dir, &req.accession));
        let metadata = match MethylomeMetadata::read(&metadata_file) {
            Ok(metadata) => metadata,
            Err(crate::error::Error::IoError(err))
                if err.kind() == std::io::ErrorKind::NotFound =>
            {
                warn!(accession = %req.accession, "unknown methylome");
                return (ResponseHeader::error(StatusCode::UnknownMethylome), None);
            }
            Err(err) => {
                warn!(accession = %req.accession, %err, "unreadable methylome metadata");
                return (ResponseHeader::error(StatusCode::InternalError), None);
            }
        };

        let (index, index_metadata) = match self.indexes.get(&metadata.assembly) {
            Ok(found) => found,
            Err(err) => {
                warn!(assembly = %metadata.assembly, %err, "no index for methylome");
                return (ResponseHeader::error(StatusCode::MetadataMismatch), None);
            }
        };
        if metadata.index_hash != index_metadata.index_hash {
            warn!(
                accession = %req.accession,
                assembly = %metadata.assembly,
                "methylome was built against a different index"
            );
            return (ResponseHeader::error(StatusCode::MetadataMismatch), None);
        }
        if req.methylome_size != index.n_cpgs_total {
            warn!(
                provided = req.methylome_size,
                expected = index.n_cpgs_total,
                "methylome size mismatch"
            );
            return (ResponseHeader::error(StatusCode::SizeMismatch), None);
        }

        (ResponseHeader::ok(0), Some(metadata))
    }

    /// Validates the offsets and aggregates counts over the resident
    /// methylome. Any failure produces an error header and no body.
    pub async fn handle_get_counts(
        &self,
        req: &RequestHeader,
        offsets: &[(u32, u32)],
        metadata: &MethylomeMetadata,
    ) -> (ResponseHeader, Vec<CountsRecord>) {
        for &(begin, end) in offsets {
            if begin > end || end > req.methylome_size {
                warn!(begin, end, size = req.methylome_size, "invalid offsets");
                return (ResponseHeader::error(StatusCode::BadRequest), Vec::new());
            }
        }

        let methylome = match self.methylomes.get(&req.accession, metadata).await {
            Ok(methylome) => methylome,
            Err(err) => {
                warn!(accession = %req.accession, %err, "methylome unavailable");
                return (ResponseHeader::error(StatusCode::from(&err)), Vec::new());
            }
        };

        let counts = methylome.counts_batch(offsets);
        debug!(
            accession = %req.accession,
            n_ranges = counts.len(),
            "computed counts"
        );
        (ResponseHeader::ok(counts.len() as u32), counts)
    }
}

/// Builds the shared handler from the server's data directories.
pub fn build_handler(
    index_dir: &std::path::Path,
    methylome_dir: &std::path::Path,
    max_resident: usize,
) -> crate::error::Result<Arc<RequestHandler>> {
    let indexes = IndexSet::from_dir(index_dir)?;
    let methylomes = MethylomeSet::new(crate::methylome::MethylomeSetConfig {
        methylome_dir: methylome_dir.to_path_buf(),
        max_resident,
    });
    Ok(Arc::new(RequestHandler::new(
        indexes,
        methylomes,
        methylome_dir.to_path_buf(),
    )))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::hash::sha256_hex_file;
    use crate::index::{metadata_path as index_metadata_path, CpgIndex, IndexMetadata};
    use crate::methylome::{MPair, Methylome, MethylomeSetConfig};
    use std::path::Path;

    pub(crate) const TOY_GENOME: &str = ">a\nACGCGT\n>b\nNN\n>c\nCG\n";

    /// Builds an index dir and a methylome dir holding accession `SRX1`
    /// with counts `[(1,0), (0,0), (2,3)]` against assembly `toy`.
    pub(crate) fn toy_fixture(root: &Path) -> (std::path::PathBuf, std::path::PathBuf) {
        let index_dir = root.join("indexes");
        let methylome_dir = root.join("methylomes");
        std::fs::create_dir_all(&index_dir).unwrap();
        std::fs::create_dir_all(&methylome_dir).unwrap();

        let genome = root.join("toy.fa");
        std::fs::write(&genome, TOY_GENOME).unwrap();
        let index = CpgIndex::from_genome(&genome).unwrap();
        let index_path = index_dir.join("toy.cpg_idx");
        index.write(&index_path).unwrap();
        let index_hash = sha256_hex_file(&index_path).unwrap();
        IndexMetadata::new("toy", &index, index_hash.clone())
            .write(index_metadata_path(&index_path))
            .unwrap();

        let methylome =
            Methylome::from_pairs(&[MPair::new(1, 0), MPair::new(0, 0), MPair::new(2, 3)]);
        let m16_path = methylome_path(&methylome_dir, "SRX1");
        methylome.write(&m16_path).unwrap();
        MethylomeMetadata::new("toy", &index_hash, &methylome)
            .write(metadata_path(&m16_path))
            .unwrap();

        (index_dir, methylome_dir)
    }

    fn handler(index_dir: &Path, methylome_dir: &Path) -> RequestHandler {
        let indexes = IndexSet::from_dir(index_dir).unwrap();
        let methylomes = MethylomeSet::new(MethylomeSetConfig {
            methylome_dir: methylome_dir.to_path_buf(),
            max_resident: 4,
        });
        RequestHandler::new(indexes, methylomes, methylome_dir.to_path_buf())
    }

    #[tokio::test]
    async fn valid_request_yields_counts() {
        let dir = tempfile::tempdir().unwrap();
        let (index_dir, methylome_dir) = toy_fixture(dir.path());
        let handler = handler(&index_dir, &methylome_dir);

        let req = RequestHeader::new("SRX1", 3, 1);
        let (resp, metadata) = handler.handle_header(&req);
        assert!(resp.status.is_ok());
        let metadata = metadata.unwrap();

        let (resp, counts) = handler.handle_get_counts(&req, &[(0, 3)], &metadata).await;
        assert_eq!(resp, ResponseHeader::ok(1));
        assert_eq!(
            counts,
            vec![CountsRecord {
                n_meth: 3,
                n_unmeth: 3
            }]
        );
    }

    #[tokio::test]
    async fn empty_request_yields_empty_response() {
        let dir = tempfile::tempdir().unwrap();
        let (index_dir, methylome_dir) = toy_fixture(dir.path());
        let handler = handler(&index_dir, &methylome_dir);

        let req = RequestHeader::new("SRX1", 3, 0);
        let (resp, metadata) = handler.handle_header(&req);
        assert!(resp.status.is_ok());
        let (resp, counts) = handler
            .handle_get_counts(&req, &[], &metadata.unwrap())
            .await;
        assert_eq!(resp, ResponseHeader::ok(0));
        assert!(counts.is_empty());
    }

    #[tokio::test]
    async fn unknown_accession_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let (index_dir, methylome_dir) = toy_fixture(dir.path());
        let handler = handler(&index_dir, &methylome_dir);

        let req = RequestHeader::new("SRX999", 3, 1);
        let (resp, metadata) = handler.handle_header(&req);
        assert_eq!(resp.status, StatusCode::UnknownMethylome);
        assert!(metadata.is_none());
    }

    #[tokio::test]
    async fn bad_accession_charset_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let (index_dir, methylome_dir) = toy_fixture(dir.path());
        let handler = handler(&index_dir, &methylome_dir);

        let req = RequestHeader::new("../etc/passwd", 3, 1);
        let (resp, _) = handler.handle_header(&req);
        assert_eq!(resp.status, StatusCode::BadRequest);
    }

    #[tokio::test]
    async fn oversized_interval_count_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let (index_dir, methylome_dir) = toy_fixture(dir.path());
        let handler = handler(&index_dir, &methylome_dir);

        let req = RequestHeader::new("SRX1", 3, MAX_INTERVALS + 1);
        let (resp, _) = handler.handle_header(&req);
        assert_eq!(resp.status, StatusCode::BadRequest);
    }

    #[tokio::test]
    async fn wrong_methylome_size_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let (index_dir, methylome_dir) = toy_fixture(dir.path());
        let handler = handler(&index_dir, &methylome_dir);

        let req = RequestHeader::new("SRX1", 5, 1);
        let (resp, _) = handler.handle_header(&req);
        assert_eq!(resp.status, StatusCode::SizeMismatch);
    }

    #[tokio::test]
    async fn stale_index_hash_is_a_metadata_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let (index_dir, methylome_dir) = toy_fixture(dir.path());

        // rewrite the methylome metadata to reference a different index
        let m16_path = methylome_path(&methylome_dir, "SRX1");
        let mut metadata = MethylomeMetadata::read(metadata_path(&m16_path)).unwrap();
        metadata.index_hash = "0".repeat(64);
        metadata.write(metadata_path(&m16_path)).unwrap();

        let handler = handler(&index_dir, &methylome_dir);
        let req = RequestHeader::new("SRX1", 3, 1);
        let (resp, _) = handler.handle_header(&req);
        assert_eq!(resp.status, StatusCode::MetadataMismatch);
    }

    #[tokio::test]
    async fn invalid_offsets_fail_the_whole_response() {
        let dir = tempfile::tempdir().unwrap();
        let (index_dir, methylome_dir) = toy_fixture(dir.path());
        let handler = handler(&index_dir, &methylome_dir);

        let req = RequestHeader::new("SRX1", 3, 2);
        let (_, metadata) = handler.handle_header(&req);
        let metadata = metadata.unwrap();

        let (resp, counts) = handler
            .handle_get_counts(&req, &[(0, 2), (2, 9)], &metadata)
            .await;
        assert_eq!(resp.status, StatusCode::BadRequest);
        assert!(counts.is_empty());

        let (resp, _) = handler
            .handle_get_counts(&req, &[(2, 1), (0, 1)], &metadata)
            .await;
        assert_eq!(resp.status, StatusCode::BadRequest);
    }
}
