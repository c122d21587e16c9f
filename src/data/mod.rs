/// Data layer: DTD reading, document parsing, the dataset model, export.
///
/// Architecture:
/// ```text
///   .dtd           .xml
///     │              │
///     ▼              │
///   ┌──────┐         │
///   │ dtd  │ entities, element and attribute declarations
///   └──────┘         │
///     │              ▼
///     └────────► ┌─────────┐
///                │ parser  │  XML events → records (lenient / strict)
///                └─────────┘
///                     │
///                     ▼
///                ┌─────────┐
///                │ Dataset │  Vec<Record>, key index, per-kind counts
///                └─────────┘
///                     │
///                     ▼
///                ┌─────────┐
///                │ export  │  JSON / CSV
///                └─────────┘
/// ```

pub mod dtd;
pub mod export;
pub mod model;
pub mod parser;
