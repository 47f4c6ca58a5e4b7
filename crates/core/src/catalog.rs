use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryDescriptor {
    pub name: &'static str,
    pub text: &'static str,
    pub description: &'static str,
}

pub const PREDEFINED_QUERIES: [QueryDescriptor; 6] = [
    QueryDescriptor {
        name: "Select All Orders (Limited)",
        text: "SELECT * FROM orders LIMIT 100;",
        description: "Shows a sample of all order data with all columns",
    },
    QueryDescriptor {
        name: "Select Recent Orders",
        text: "SELECT * FROM orders ORDER BY orderDate DESC LIMIT 50;",
        description: "Shows the most recent orders first",
    },
    QueryDescriptor {
        name: "Select Orders with High Freight",
        text: "SELECT * FROM orders WHERE freight > 100 ORDER BY freight DESC LIMIT 25;",
        description: "Shows orders with high shipping costs",
    },
    QueryDescriptor {
        name: "Count Orders by Ship Country",
        text: "SELECT shipCountry, COUNT(*) as order_count FROM orders \
               GROUP BY shipCountry ORDER BY order_count DESC;",
        description: "Provides a summary of orders by destination country",
    },
    QueryDescriptor {
        name: "Customer Order Analysis",
        text: "SELECT customerID, COUNT(*) as order_count, SUM(freight) as total_freight \
               FROM orders GROUP BY customerID ORDER BY total_freight DESC LIMIT 15;",
        description: "Shows top customers by total freight costs",
    },
    QueryDescriptor {
        name: "Shipping Analysis by City",
        text: "SELECT shipCity, shipCountry, COUNT(*) as shipment_count, \
               AVG(freight) as avg_freight FROM orders GROUP BY shipCity, shipCountry \
               ORDER BY shipment_count DESC LIMIT 20;",
        description: "Shows most frequent shipping destinations with average freight costs",
    },
];

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CatalogError {
    #[error("query index {index} is out of range (catalog has {len} queries)")]
    IndexOutOfRange { index: usize, len: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryMode {
    Predefined,
    Custom,
}

// Both buffers survive mode switches; `mode` alone decides which one is read.
#[derive(Debug, Clone)]
pub struct ActiveQuery {
    catalog: &'static [QueryDescriptor],
    selected_index: usize,
    custom_text: String,
    mode: QueryMode,
}

impl Default for ActiveQuery {
    fn default() -> Self {
        Self::new(&PREDEFINED_QUERIES)
    }
}

impl ActiveQuery {
    /// # Panics
    ///
    /// Panics when `catalog` is empty.
    #[must_use]
    pub fn new(catalog: &'static [QueryDescriptor]) -> Self {
        assert!(!catalog.is_empty(), "query catalog must not be empty");
        Self {
            catalog,
            selected_index: 0,
            custom_text: String::new(),
            mode: QueryMode::Predefined,
        }
    }

    #[must_use]
    pub fn catalog(&self) -> &'static [QueryDescriptor] {
        self.catalog
    }

    #[must_use]
    pub fn mode(&self) -> QueryMode {
        self.mode
    }

    #[must_use]
    pub fn selected_index(&self) -> usize {
        self.selected_index
    }

    #[must_use]
    pub fn selected(&self) -> &'static QueryDescriptor {
        &self.catalog[self.selected_index]
    }

    #[must_use]
    pub fn custom_text(&self) -> &str {
        &self.custom_text
    }

    pub fn select_predefined(
        &mut self,
        index: usize,
    ) -> Result<&'static QueryDescriptor, CatalogError> {
        let Some(descriptor) = self.catalog.get(index) else {
            return Err(CatalogError::IndexOutOfRange {
                index,
                len: self.catalog.len(),
            });
        };
        self.selected_index = index;
        self.mode = QueryMode::Predefined;
        Ok(descriptor)
    }

    pub fn edit_text(&mut self, text: impl Into<String>) {
        self.custom_text = text.into();
        self.mode = QueryMode::Custom;
    }

    #[must_use]
    pub fn current_text(&self) -> &str {
        match self.mode {
            QueryMode::Predefined => self.selected().text,
            QueryMode::Custom => &self.custom_text,
        }
    }
}
