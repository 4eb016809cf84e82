/// ETL Pipeline Module
///
/// The stages of one refresh cycle:
/// - Extract: Stream the promotions CSV file in fixed-size chunks
/// - Transform: Validate rows and parse prices and expiration dates
/// - Load: Bulk copy each chunk into PostgreSQL in its own transaction
pub mod extract;
pub mod load;
pub mod transform;
