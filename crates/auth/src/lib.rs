//! tunnelwerk-auth – Kollaborator-Schnittstellen fuer Authentifizierung
//!
//! Der Kern konsumiert ausschliesslich die drei Traits in diesem Crate:
//! Token-Pruefung, Sperrliste und Berechtigungs-Lookup. Der eigentliche
//! Token-Codec, die HTTP-Login-Oberflaeche und die Persistenz liegen
//! ausserhalb des Kerns.
//!
//! Fuer den Standalone-Betrieb und Tests gibt es In-Memory-Varianten.

pub mod memory;
pub mod token;

// Bequeme Re-Exporte
pub use memory::{MemorySperrListe, MemoryTokenDienst};
pub use token::{AuthError, BerechtigungsQuelle, SperrListe, TokenAnspruch, TokenPruefer};
