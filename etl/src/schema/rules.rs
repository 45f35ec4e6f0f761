//! Per-table column rules that override value-based type inference.
//!
//! Column names are the sanitized names (`client_id`, not `client.id`).

/// Columns of a table whose type is fixed regardless of the values they hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableRules {
    /// Identifiers, codes and free text that must never be parsed as numbers.
    pub string_columns: &'static [&'static str],
    /// Measures stored as `FLOAT64`.
    pub numeric_columns: &'static [&'static str],
    pub timestamp_columns: &'static [&'static str],
}

impl TableRules {
    pub const EMPTY: TableRules = TableRules {
        string_columns: &[],
        numeric_columns: &[],
        timestamp_columns: &[],
    };

    /// Returns the built-in rules of `table`, or [`TableRules::EMPTY`] for unknown tables.
    pub fn for_table(table: &str) -> TableRules {
        match table {
            "categories" => CATEGORIES,
            "clients" => CLIENTS,
            "locations" => LOCATIONS,
            "manufacturers" => MANUFACTURERS,
            "products" => PRODUCTS,
            "cashless" => CASHLESS,
            _ => TableRules::EMPTY,
        }
    }

    pub fn is_string(&self, column: &str) -> bool {
        self.string_columns.contains(&column)
    }

    pub fn is_numeric(&self, column: &str) -> bool {
        self.numeric_columns.contains(&column)
    }

    pub fn is_timestamp(&self, column: &str) -> bool {
        self.timestamp_columns.contains(&column)
    }
}

const CATEGORIES: TableRules = TableRules {
    string_columns: &["id", "name"],
    numeric_columns: &[],
    timestamp_columns: &[],
};

const CLIENTS: TableRules = TableRules {
    string_columns: &[
        "id",
        "name",
        "corporate_name",
        "cpf",
        "cnpj",
        "nif",
        "contact_name",
        "contact_phone",
        "contact_email",
        "notes",
        "legal_type",
        "main_location_id",
    ],
    numeric_columns: &[],
    timestamp_columns: &[],
};

const LOCATIONS: TableRules = TableRules {
    string_columns: &[
        "id",
        "client_id",
        "name",
        "phone",
        "street",
        "number",
        "complement",
        "neighborhood",
        "city",
        "country",
        "state",
        "zip_code",
    ],
    numeric_columns: &["latitude", "longitude"],
    timestamp_columns: &[],
};

const MANUFACTURERS: TableRules = TableRules {
    string_columns: &["id", "name"],
    numeric_columns: &[],
    timestamp_columns: &[],
};

const PRODUCTS: TableRules = TableRules {
    string_columns: &[
        "id",
        "type",
        "manufacturer_id",
        "category_id",
        "supply_category_id",
        "name",
        "upc_code",
        "barcode",
        "external_id",
        "image",
        "tags",
        "additional_barcodes",
        "ncm_code",
        "cest_code",
        "url",
        "inventories",
        "packing_id",
        "packing_name",
    ],
    numeric_columns: &[
        "weight",
        "cost_price",
        "default_price",
        "vendible_balance",
        "packing_quantity",
    ],
    timestamp_columns: &["created_at", "updated_at"],
};

// `id` is listed so that raw historical files, which still carry `id` instead of
// `transaction_id`, keep their identifiers verbatim when read back.
const CASHLESS: TableRules = TableRules {
    string_columns: &[
        "id",
        "transaction_id",
        "point_of_sale",
        "kind",
        "status",
        "installation_id",
        "planogram_item_id",
        "equipment_id",
        "equipment_label_number",
        "equipment_serial_number",
        "masked_card_number",
        "issuer_authorization_code",
        "order_id",
        "cancel_reason_detailed",
        "physical_locator",
        "place",
        "planogram_item",
        "cashless_error_friendly",
        "client_id",
        "client_name",
        "location_id",
        "location_name",
        "machine_id",
        "machine_asset_number",
        "machine_model_id",
        "machine_model_name",
        "good_id",
        "good_type",
        "good_category_id",
        "good_manufacturer_id",
        "good_name",
        "good_upc_code",
        "good_barcode",
        "eft_provider_id",
        "eft_provider_name",
        "eft_authorizer_id",
        "eft_authorizer_name",
        "eft_card_brand_id",
        "eft_card_brand_name",
        "eft_card_type_id",
        "eft_card_type_name",
        "cashless_error_complete_description",
        "payment_authorizer_id",
        "payment_authorizer_name",
        "combo_items",
    ],
    numeric_columns: &[
        "number_of_payments",
        "quantity",
        "value",
        "discount_value",
        "cost_price",
        "request_number",
    ],
    timestamp_columns: &["occurred_at"],
};
