diesel::table! {
    checkout_attempts (id) {
        id -> Varchar,
        user_id -> Varchar,
        item_id -> Int8,
        sale_id -> Int8,
        expires_at -> Timestamptz,
        is_used -> Bool,
        created_at -> Timestamptz,
    }
}

diesel::table! {
    items (id) {
        id -> Int8,
        sale_id -> Int8,
        name -> Varchar,
        image_url -> Varchar,
        is_sold -> Bool,
        created_at -> Nullable<Timestamptz>,
        updated_at -> Nullable<Timestamptz>,
    }
}

diesel::table! {
    purchases (id) {
        id -> Uuid,
        user_id -> Varchar,
        item_id -> Int8,
        sale_id -> Int8,
        checkout_code -> Varchar,
        purchased_at -> Timestamptz,
    }
}

diesel::table! {
    sales (id) {
        id -> Int8,
        start_time -> Timestamptz,
        end_time -> Timestamptz,
        total_items -> Int4,
        sold_items -> Int4,
        is_active -> Bool,
        created_at -> Nullable<Timestamptz>,
        updated_at -> Nullable<Timestamptz>,
    }
}

diesel::table! {
    user_sale_limits (user_id, sale_id) {
        user_id -> Varchar,
        sale_id -> Int8,
        items_purchased -> Int4,
    }
}

diesel::joinable!(checkout_attempts -> sales (sale_id));
diesel::joinable!(items -> sales (sale_id));
diesel::joinable!(purchases -> sales (sale_id));
diesel::joinable!(user_sale_limits -> sales (sale_id));

diesel::allow_tables_to_appear_in_same_query!(
    checkout_attempts,
    items,
    purchases,
    sales,
    user_sale_limits,
);
