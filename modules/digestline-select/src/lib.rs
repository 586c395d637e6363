//! Pure selection algorithms: similarity, clustering, category grouping,
//! priority rotation and round-robin collection. No I/O.

pub mod category;
pub mod cluster;
pub mod priority;
pub mod round_robin;
pub mod similarity;

pub use category::{CategoryCatalog, DomainFilter};
pub use cluster::{cluster, cluster_category, ClusterPolicy, DIGEST_NOMINAL_SIMILARITY};
pub use priority::{rotate, sort_by_priority};
pub use round_robin::{collect, Collection};
pub use similarity::{cosine_similarity, mean_vector, SimilarityError};
