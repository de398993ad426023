/// A handle the manager either created (and must destroy) or was lent.
#[derive(Debug, Clone)]
pub enum Ownership<H> {
    Owned(H),
    Borrowed(H),
}

impl<H> Ownership<H> {
    pub fn handle(&self) -> &H {
        match self {
            Self::Owned(h) | Self::Borrowed(h) => h,
        }
    }

    pub fn is_owned(&self) -> bool {
        matches!(self, Self::Owned(_))
    }

    /// Gives the handle up. Runs `destroy` only for owned handles and reports
    /// whether it ran.
    pub fn release(self, destroy: impl FnOnce(&H)) -> bool {
        match self {
            Self::Owned(h) => {
                destroy(&h);
                true
            }
            Self::Borrowed(_) => false,
        }
    }
}
